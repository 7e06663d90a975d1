//! Quoting utilities for commands run through `cmd.exe` and PowerShell on the remote host.

use base64::{Engine, engine::general_purpose::STANDARD as BASE64};

/// Quote a single argument following the `CreateProcess` command-line rules.
///
/// Arguments without whitespace or double quotes are returned untouched. Otherwise
/// the value is wrapped in double quotes, embedded quotes are escaped with a
/// backslash, and backslashes that precede a quote (including the closing one)
/// are doubled so they stay literal.
///
/// # Examples
/// ```
/// # use kuiper_launcher::shell::quote_windows_argument;
/// assert_eq!(quote_windows_argument(r"C:\Windows\Temp\"), r"C:\Windows\Temp\");
/// assert_eq!(quote_windows_argument(r"C:\build agent\"), r#""C:\build agent\\""#);
/// assert_eq!(quote_windows_argument(""), r#""""#);
/// ```
pub fn quote_windows_argument(arg: &str) -> String {
    let needs_quotes = arg.is_empty()
        || arg
            .chars()
            .any(|c| matches!(c, ' ' | '\t' | '\n' | '\x0b' | '"'));
    if !needs_quotes {
        return arg.to_string();
    }

    let mut quoted = String::with_capacity(arg.len() + 2);
    quoted.push('"');
    let mut backslashes = 0usize;
    for c in arg.chars() {
        match c {
            '\\' => {
                backslashes += 1;
                continue;
            }
            '"' => {
                push_backslashes(&mut quoted, backslashes * 2 + 1);
                quoted.push('"');
            }
            _ => {
                push_backslashes(&mut quoted, backslashes);
                quoted.push(c);
            }
        }
        backslashes = 0;
    }
    push_backslashes(&mut quoted, backslashes * 2);
    quoted.push('"');
    quoted
}

fn push_backslashes(out: &mut String, count: usize) {
    out.extend(std::iter::repeat_n('\\', count));
}

/// Normalize a Windows directory so it ends with a path separator.
pub fn ensure_trailing_separator(dir: &str) -> String {
    if dir.ends_with('\\') || dir.ends_with('/') {
        dir.to_string()
    } else {
        format!("{dir}\\")
    }
}

/// Encode a PowerShell script for use with `-EncodedCommand`.
///
/// The script is converted to UTF-16LE and Base64 encoded, so the resulting
/// command line contains nothing `cmd.exe` would interpret.
///
/// # Examples
/// ```
/// # use kuiper_launcher::shell::encode_powershell_command;
/// assert_eq!(encode_powershell_command("dir"), "ZABpAHIA");
/// ```
pub fn encode_powershell_command(cmd: &str) -> String {
    let utf16_bytes: Vec<u8> = cmd.encode_utf16().flat_map(|c| c.to_le_bytes()).collect();
    BASE64.encode(&utf16_bytes)
}

/// Build a full `powershell` invocation running `script` without profile or prompts.
pub fn powershell_invocation(script: &str) -> String {
    format!(
        "powershell -NoProfile -NonInteractive -EncodedCommand {}",
        encode_powershell_command(script)
    )
}

/// Escape a string for a PowerShell single-quoted context.
///
/// # Examples
/// ```
/// # use kuiper_launcher::shell::escape_powershell;
/// assert_eq!(escape_powershell("it's"), "'it''s'");
/// ```
pub fn escape_powershell(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}
