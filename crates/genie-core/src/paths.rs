//! Path conversion for a chat CLI running under WSL.

/// Converts `C:\dir\file` to `/mnt/c/dir/file`.
///
/// Paths without a drive letter only get their backslashes flipped.
pub fn windows_to_wsl_path(path: &str) -> String {
    let mut chars = path.chars();
    if let (Some(drive), Some(':'), Some('\\' | '/')) = (chars.next(), chars.next(), chars.next())
        && drive.is_ascii_alphabetic()
    {
        let rest = chars.as_str().replace('\\', "/");
        return format!("/mnt/{}/{rest}", drive.to_ascii_lowercase());
    }
    path.replace('\\', "/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drive_paths() {
        assert_eq!(
            windows_to_wsl_path(r"C:\Users\me\chat.json"),
            "/mnt/c/Users/me/chat.json"
        );
        assert_eq!(windows_to_wsl_path("d:/data/x.json"), "/mnt/d/data/x.json");
        assert_eq!(windows_to_wsl_path(r"E:\"), "/mnt/e/");
    }

    #[test]
    fn test_relative_and_unix_paths() {
        assert_eq!(windows_to_wsl_path(r"logs\chat.json"), "logs/chat.json");
        assert_eq!(windows_to_wsl_path("/tmp/chat.json"), "/tmp/chat.json");
        assert_eq!(windows_to_wsl_path("1:\\odd"), "1:/odd");
    }
}
