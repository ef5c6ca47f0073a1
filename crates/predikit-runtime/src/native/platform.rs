//! Platform library naming.
//!
//! A predictor that supports on-device execution publishes one `dso`
//! resource per platform; the resource name encodes the target OS and
//! architecture so the client can pick the right one.

/// Canonical architecture token used in library names.
fn canonical_arch(arch: &str) -> Option<&'static str> {
    match arch {
        "x86_64" | "amd64" | "x64" => Some("x64"),
        "aarch64" | "arm64" => Some("arm64"),
        _ => None,
    }
}

/// Library file name for a target platform, or `None` when the platform
/// has no native module support.
pub fn module_library(os: &str, arch: &str) -> Option<String> {
    let arch = canonical_arch(arch)?;
    match os {
        "linux" => Some(format!("libpredikit-linux-{arch}.so")),
        "macos" => Some(format!("libpredikit-macos-{arch}.dylib")),
        "windows" => Some(format!("predikit-win-{arch}.dll")),
        _ => None,
    }
}

/// Library file name for the platform this client is running on.
pub fn current_library() -> Option<String> {
    module_library(std::env::consts::OS, std::env::consts::ARCH)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arch_aliases_are_normalized() {
        assert_eq!(
            module_library("linux", "x86_64").as_deref(),
            Some("libpredikit-linux-x64.so")
        );
        assert_eq!(
            module_library("linux", "amd64").as_deref(),
            Some("libpredikit-linux-x64.so")
        );
        assert_eq!(
            module_library("macos", "aarch64").as_deref(),
            Some("libpredikit-macos-arm64.dylib")
        );
        assert_eq!(
            module_library("windows", "x64").as_deref(),
            Some("predikit-win-x64.dll")
        );
    }

    #[test]
    fn unsupported_platforms_have_no_library() {
        assert_eq!(module_library("freebsd", "x86_64"), None);
        assert_eq!(module_library("linux", "riscv64"), None);
    }

    #[test]
    fn current_platform_resolves_on_supported_hosts() {
        if ["linux", "macos", "windows"].contains(&std::env::consts::OS)
            && ["x86_64", "aarch64"].contains(&std::env::consts::ARCH)
        {
            assert!(current_library().is_some());
        }
    }
}
