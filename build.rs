use std::{env, path::PathBuf};

const WATCHED_VARIABLES: [&str; 4] = [
    "FFMPEG_DIR",
    "VCPKG_ROOT",
    "VCPKGRS_DYNAMIC",
    "VCPKGRS_TRIPLET",
];

fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    for variable in WATCHED_VARIABLES {
        println!("cargo:rerun-if-env-changed={variable}");
    }

    // ffmpeg-sys-next finds FFmpeg through pkg-config everywhere but Windows.
    let is_windows = env::var("CARGO_CFG_TARGET_OS").is_ok_and(|os| os == "windows");
    if !is_windows || env::var_os("FFMPEG_DIR").is_some() {
        return;
    }

    match vcpkg_ffmpeg_dir() {
        Some(dir) if dir.exists() => println!(
            "cargo:warning=stillframe: using vcpkg FFmpeg at {0}; set FFMPEG_DIR={0} to silence this warning",
            dir.display()
        ),
        Some(dir) => println!(
            "cargo:warning=stillframe: VCPKG_ROOT is set but {} does not exist",
            dir.display()
        ),
        None => println!(
            "cargo:warning=stillframe: FFMPEG_DIR is not set; install FFmpeg (for example `vcpkg install ffmpeg`) and point FFMPEG_DIR at it"
        ),
    }
}

fn vcpkg_ffmpeg_dir() -> Option<PathBuf> {
    let root = env::var_os("VCPKG_ROOT")?;
    let triplet = env::var("VCPKGRS_TRIPLET").unwrap_or_else(|_| "x64-windows".to_string());
    Some(PathBuf::from(root).join("installed").join(triplet))
}
