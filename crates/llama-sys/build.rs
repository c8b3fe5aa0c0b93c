use std::env;
use std::path::{Path, PathBuf};

fn main() {
    let manifest_dir = PathBuf::from(env::var("CARGO_MANIFEST_DIR").unwrap());
    let source_dir = env::var("LLAMA_CPP_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| manifest_dir.join("../../vendor/llama.cpp"));
    let target_os = env::var("CARGO_CFG_TARGET_OS").unwrap_or_default();

    println!("cargo:rerun-if-env-changed=LLAMA_CPP_DIR");
    println!("cargo:rerun-if-env-changed=LLAMA_PREBUILT_DIR");

    // Either link a llama.cpp that an earlier build stage installed
    // (`LLAMA_PREBUILT_DIR/{lib,include}`), or build the checkout with cmake.
    let (lib_dir, include_dir) = match env::var("LLAMA_PREBUILT_DIR") {
        Ok(prebuilt) => prebuilt_dirs(Path::new(&prebuilt)),
        Err(_) => cmake_build(&source_dir, &target_os),
    };

    link_libraries(&lib_dir, &target_os);
    generate_bindings(&include_dir, &source_dir);
}

fn lib_subdir(root: &Path) -> PathBuf {
    if root.join("lib64").exists() {
        root.join("lib64")
    } else {
        root.join("lib")
    }
}

fn prebuilt_dirs(prebuilt: &Path) -> (PathBuf, PathBuf) {
    assert!(
        prebuilt.exists(),
        "LLAMA_PREBUILT_DIR={} does not exist",
        prebuilt.display()
    );
    println!(
        "cargo:warning=Using prebuilt llama.cpp from {}",
        prebuilt.display()
    );
    (lib_subdir(prebuilt), prebuilt.join("include"))
}

fn cmake_build(source_dir: &Path, target_os: &str) -> (PathBuf, PathBuf) {
    assert!(
        source_dir.join("CMakeLists.txt").exists(),
        "llama.cpp source not found at {}. \
         Clone it there, point LLAMA_CPP_DIR at a checkout, \
         or set LLAMA_PREBUILT_DIR.",
        source_dir.display()
    );

    let mut cfg = cmake::Config::new(source_dir);
    cfg.define("BUILD_SHARED_LIBS", "OFF")
        .define("LLAMA_BUILD_SERVER", "OFF")
        .define("LLAMA_BUILD_TESTS", "OFF")
        .define("LLAMA_BUILD_EXAMPLES", "OFF")
        .define("LLAMA_BUILD_TOOLS", "OFF")
        .define("LLAMA_BUILD_COMMON", "OFF");

    if env::var("CARGO_FEATURE_CUDA").is_ok() {
        cfg.define("GGML_CUDA", "ON");
    }
    if env::var("CARGO_FEATURE_VULKAN").is_ok() {
        cfg.define("GGML_VULKAN", "ON");
    }
    if env::var("CARGO_FEATURE_ROCM").is_ok() {
        let rocm = env::var("ROCM_PATH").unwrap_or_else(|_| "/opt/rocm".into());
        cfg.define("GGML_HIP", "ON")
            .define("CMAKE_HIP_COMPILER_ROCM_ROOT", &rocm)
            .define("CMAKE_HIP_FLAGS", format!("--rocm-path={rocm}"));
    }
    if target_os == "macos" {
        cfg.define("GGML_METAL", "ON");
    }

    let dst = cfg.build();
    println!("cargo:rerun-if-changed={}", source_dir.join("include").display());
    (lib_subdir(&dst), dst.join("include"))
}

fn link_libraries(lib_dir: &Path, target_os: &str) {
    println!("cargo:rustc-link-search=native={}", lib_dir.display());
    println!("cargo:rustc-link-lib=static=llama");

    let has = |name: &str| lib_dir.join(format!("lib{name}.a")).exists();
    for name in ["ggml", "ggml-base", "ggml-cpu"] {
        if has(name) {
            println!("cargo:rustc-link-lib=static={name}");
        }
    }

    if env::var("CARGO_FEATURE_CUDA").is_ok() && has("ggml-cuda") {
        println!("cargo:rustc-link-lib=static=ggml-cuda");
        for lib in ["cuda", "cublas", "culibos", "cudart"] {
            println!("cargo:rustc-link-lib={lib}");
        }
    }
    if env::var("CARGO_FEATURE_VULKAN").is_ok() && has("ggml-vulkan") {
        println!("cargo:rustc-link-lib=static=ggml-vulkan");
        println!("cargo:rustc-link-lib=vulkan");
    }
    if env::var("CARGO_FEATURE_ROCM").is_ok() && has("ggml-hip") {
        println!("cargo:rustc-link-lib=static=ggml-hip");
        let rocm = env::var("ROCM_PATH").unwrap_or_else(|_| "/opt/rocm".into());
        println!("cargo:rustc-link-search=native={rocm}/lib");
        for lib in ["amdhip64", "hipblas", "rocblas"] {
            println!("cargo:rustc-link-lib={lib}");
        }
    }

    match target_os {
        "linux" => {
            for lib in ["stdc++", "m", "pthread", "gomp"] {
                println!("cargo:rustc-link-lib={lib}");
            }
        }
        "macos" => {
            if has("ggml-metal") {
                println!("cargo:rustc-link-lib=static=ggml-metal");
            }
            for fw in ["Accelerate", "Metal", "MetalKit", "Foundation"] {
                println!("cargo:rustc-link-lib=framework={fw}");
            }
            println!("cargo:rustc-link-lib=c++");
        }
        "windows" => println!("cargo:rustc-link-lib=msvcrt"),
        _ => {}
    }
}

fn generate_bindings(include_dir: &Path, source_dir: &Path) {
    let mut builder = bindgen::Builder::default()
        .header("wrapper.h")
        .clang_arg(format!("-I{}", include_dir.display()));

    // The installed tree may not carry ggml's headers.
    let ggml_include = source_dir.join("ggml/include");
    if ggml_include.exists() {
        builder = builder.clang_arg(format!("-I{}", ggml_include.display()));
    }

    let bindings = builder
        .allowlist_function("llama_.*")
        .allowlist_function("ggml_.*")
        .allowlist_type("llama_.*")
        .allowlist_type("ggml_.*")
        .allowlist_var("LLAMA_.*")
        .allowlist_var("GGML_.*")
        .derive_default(true)
        .size_t_is_usize(true)
        .layout_tests(false)
        .generate()
        .expect("Failed to generate llama.cpp bindings");

    let out = PathBuf::from(env::var("OUT_DIR").unwrap());
    bindings
        .write_to_file(out.join("bindings.rs"))
        .expect("Failed to write bindings");

    println!("cargo:rerun-if-changed=wrapper.h");
}
