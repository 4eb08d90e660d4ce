fn main() {
    let version = std::env::var("KEEPER_VERSION")
        .unwrap_or_else(|_| env!("CARGO_PKG_VERSION").to_string());
    println!("cargo:rustc-env=KEEPER_VERSION={}", version);
    println!(
        "cargo:rustc-env=KEEPER_BUILD_TIME={}",
        chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
    );
    println!("cargo:rerun-if-env-changed=KEEPER_VERSION");
}
