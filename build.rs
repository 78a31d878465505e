fn main() {
    // The library builds without Tauri; only the app shell needs its context
    #[cfg(feature = "tauri-app")]
    tauri_build::build();
}
