use std::env;
use std::path::Path;

fn main() {
    // 告诉 cargo 在 build.rs 变化时重新运行
    println!("cargo:rerun-if-changed=build.rs");

    // 添加 ld 目录到链接路径（如果有自定义链接脚本）
    let manifest_dir = env::var("CARGO_MANIFEST_DIR").unwrap();
    let ld_dir = format!("{}/ld", manifest_dir);
    if Path::new(&ld_dir).is_dir() {
        println!("cargo:rustc-link-search={}", ld_dir);
    }
}
