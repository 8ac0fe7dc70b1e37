//! Script framing and quoting for the interactive shell.
//!
//! The shell is driven through a line-buffered pipe with no out-of-band
//! signalling, so every command is wrapped in sentinel markers: a begin
//! marker printed before the command runs and an end marker carrying a
//! literal success token. The transport scans the raw stream for these
//! markers to delimit one command's output.

use psbridge_core::Credentials;

/// Printed on its own line immediately before the command's output.
pub const BEGIN_MARKER: &str = "PSB-BEGIN-OUTPUT";

/// Printed after the command's output, followed by the success token.
pub const END_MARKER: &str = "PSB-END-OUTPUT";

/// Token on the end-marker line when the command completed.
pub const SUCCESS_TOKEN: &str = "1";

/// Token on the end-marker line when the command threw.
pub const FAILURE_TOKEN: &str = "0";

/// Wrap `command` in the sentinel frame.
///
/// The command runs inside a try/catch; its result is bound to `$result`
/// and serialized by the `render` pipeline fragment on success, while a
/// failure prints the shell's error text between the same markers. The
/// end marker always arrives, carrying `1` or `0`.
pub fn frame_command(command: &str, render: &str) -> String {
    format!(
        "Write-Host '{BEGIN_MARKER}'; \
         try {{ $result = Invoke-Expression '{}'; {render}; \
         Write-Host '{END_MARKER} {SUCCESS_TOKEN}' }} \
         catch {{ $_ | Out-Host; \
         Write-Host '{END_MARKER} {FAILURE_TOKEN}' }}",
        quote_single(command)
    )
}

/// Escape a string for inclusion in a single-quoted shell literal.
///
/// Single quotes are the shell's verbatim quoting; the only escape is a
/// doubled quote.
pub fn quote_single(s: &str) -> String {
    s.replace('\'', "''")
}

/// Render a double-quoted shell string literal.
///
/// Backtick is the escape character inside double quotes, so literal
/// backticks are doubled and embedded double quotes are backtick-escaped.
pub fn escape(s: &str) -> String {
    format!("\"{}\"", s.replace('`', "``").replace('"', "`\""))
}

/// Collapse a multi-line script into the single line the interactive
/// shell expects.
///
/// Strips `#` comments to end of line and squeezes runs of whitespace to
/// one space. Quote-blind, so only safe on scripts we author ourselves.
pub fn compact(script: &str) -> String {
    let mut out = String::with_capacity(script.len());
    for line in script.lines() {
        let line = match line.find('#') {
            Some(pos) => &line[..pos],
            None => line,
        };
        for token in line.split_whitespace() {
            if !out.is_empty() {
                out.push(' ');
            }
            out.push_str(token);
        }
    }
    out
}

/// A named argument value for [`command_arguments`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgValue<'a> {
    /// Rendered as `-Name "value"` with double-quote escaping.
    Text(&'a str),
    /// `true` renders the bare switch `-Name`; `false` omits it.
    Flag(bool),
    /// Spliced in unquoted, for values that are themselves expressions.
    Raw(&'a str),
}

/// Render `-Name value` argument pairs for a shell command line.
pub fn command_arguments<'a>(
    args: impl IntoIterator<Item = (&'a str, ArgValue<'a>)>,
) -> String {
    let mut out = String::new();
    for (name, value) in args {
        let rendered = match value {
            ArgValue::Text(text) => escape(text),
            ArgValue::Flag(false) => continue,
            ArgValue::Flag(true) => {
                if !out.is_empty() {
                    out.push(' ');
                }
                out.push('-');
                out.push_str(name);
                continue;
            }
            ArgValue::Raw(raw) => raw.to_owned(),
        };
        if !out.is_empty() {
            out.push(' ');
        }
        out.push('-');
        out.push_str(name);
        out.push(' ');
        out.push_str(&rendered);
    }
    out
}

/// The implicit login command a fresh session runs before anything else.
///
/// Credential fields are opaque; each becomes a `-Name "value"` argument
/// in sorted field order.
pub fn login_command(credentials: &Credentials) -> String {
    let mut cmd = String::from("Login-User");
    for (name, value) in credentials.iter() {
        cmd.push_str(" -");
        cmd.push_str(name);
        cmd.push(' ');
        cmd.push_str(&escape(value));
    }
    cmd
}
