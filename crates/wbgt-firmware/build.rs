//! Injects the factory parameters as compile-time environment variables.
//!
//! Values come from the process environment or a `.env` file at the
//! workspace root, falling back to the deployed factory defaults.

const FACTORY_DEFAULTS: [(&str, &str); 3] = [
    ("WBGT_CIPHER_KEY", "ujso3kgnxtuth2bs"),
    ("WBGT_AP_PASSPHRASE", "123456abcdef"),
    ("WBGT_AP_SSID_PREFIX", "VF sensors"),
];

fn main() {
    println!("cargo:rustc-link-arg=-Tlinkall.x");

    let manifest_dir = std::env::var("CARGO_MANIFEST_DIR").unwrap_or_else(|_| ".".to_string());
    let env_path = std::path::Path::new(&manifest_dir).join("../../.env");
    if env_path.exists() {
        println!("cargo:rerun-if-changed={}", env_path.display());
        if let Err(e) = dotenvy::from_path(&env_path) {
            println!("cargo:warning=ignoring unreadable .env: {e}");
        }
    }

    for (key, default) in FACTORY_DEFAULTS {
        println!("cargo:rerun-if-env-changed={key}");
        let value = std::env::var(key).unwrap_or_else(|_| default.to_string());

        if key == "WBGT_CIPHER_KEY" && value.len() != 16 {
            panic!("WBGT_CIPHER_KEY must be exactly 16 bytes, got {}", value.len());
        }
        if key == "WBGT_AP_PASSPHRASE" && !(8..=63).contains(&value.len()) {
            panic!("WBGT_AP_PASSPHRASE must be 8..=63 characters for WPA2");
        }

        println!("cargo:rustc-env={key}={value}");
    }
}
