//! A login-bound shell session.
//!
//! A session couples one transport (one child process, logged in once with
//! one credential set) with the output strategy that parses its results.
//! Sessions also carry the bookkeeping the pool needs: creation and
//! last-use stamps, a use counter, and a failure latch.

use std::time::{Duration, Instant};

use psbridge_core::Credentials;

use crate::error::ShellError;
use crate::error_output;
use crate::output::{CommandOutput, OutputLayout, OutputStrategy};
use crate::script;
use crate::transport::{CommandTransport, PowerShellTransport};

pub struct Session {
    credentials: Credentials,
    transport: Box<dyn CommandTransport>,
    strategy: Box<dyn OutputStrategy>,
    created_at: Instant,
    last_used_at: Instant,
    use_count: u32,
    failed: bool,
}

impl Session {
    pub fn new(
        credentials: Credentials,
        transport: Box<dyn CommandTransport>,
        strategy: Box<dyn OutputStrategy>,
        now: Instant,
    ) -> Self {
        Self {
            credentials,
            transport,
            strategy,
            created_at: now,
            last_used_at: now,
            use_count: 0,
            failed: false,
        }
    }

    /// Run one command and parse whatever comes back.
    ///
    /// A transport failure latches the session as failed; parse and
    /// execution errors leave it usable.
    pub fn execute(&mut self, command: &str) -> Result<CommandOutput, ShellError> {
        let capture = match self
            .transport
            .execute(command, self.strategy.render_pipeline())
        {
            Ok(capture) => capture,
            Err(err) => {
                tracing::error!(command, "transport failure: {err}");
                self.failed = true;
                return Err(err.into());
            }
        };

        if capture.success {
            match self.strategy.parse(&capture.text) {
                Ok(output) => Ok(output),
                Err(err) => {
                    tracing::warn!(raw = %capture.text, "unparseable command output: {err}");
                    Err(err.into())
                }
            }
        } else {
            match error_output::parse_error_text(&capture.text) {
                Ok(exec_err) => Err(ShellError::Execution(exec_err)),
                Err(err) => {
                    tracing::warn!(raw = %capture.text, "unparseable error text: {err}");
                    Err(err.into())
                }
            }
        }
    }

    /// Shut the underlying shell process down. Idempotent.
    pub fn terminate(&mut self) {
        self.transport.terminate();
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    /// Whether a transport failure has condemned this session.
    pub fn is_failed(&self) -> bool {
        self.failed
    }

    pub fn use_count(&self) -> u32 {
        self.use_count
    }

    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.created_at)
    }

    pub fn idle(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_used_at)
    }

    /// Stamp a completed use. The last-use stamp never moves backwards.
    pub fn touch(&mut self, now: Instant) {
        self.use_count = self.use_count.saturating_add(1);
        if now > self.last_used_at {
            self.last_used_at = now;
        }
    }
}

/// Configuration for spawning new sessions.
#[derive(Debug, Clone)]
pub struct SessionBuilder {
    shell_bin: String,
    shell_args: Vec<String>,
    timeout: Duration,
    layout: OutputLayout,
}

pub const DEFAULT_SHELL_BIN: &str = "powershell.exe";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

impl SessionBuilder {
    pub fn new() -> Self {
        Self {
            shell_bin: DEFAULT_SHELL_BIN.to_owned(),
            shell_args: vec!["-Command".to_owned(), "-".to_owned()],
            timeout: DEFAULT_TIMEOUT,
            layout: OutputLayout::default(),
        }
    }

    #[must_use]
    pub fn with_shell_bin(mut self, bin: impl Into<String>) -> Self {
        self.shell_bin = bin.into();
        self
    }

    #[must_use]
    pub fn with_shell_args(mut self, args: Vec<String>) -> Self {
        self.shell_args = args;
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_layout(mut self, layout: OutputLayout) -> Self {
        self.layout = layout;
        self
    }

    /// Spawn the shell, perform the implicit login, and hand back a ready
    /// session.
    ///
    /// The login command is built from the credential fields and its output
    /// is discarded; a login failure surfaces as the usual
    /// [`ShellError::Execution`].
    pub fn connect(
        &self,
        credentials: &Credentials,
        now: Instant,
    ) -> Result<Session, ShellError> {
        let transport =
            PowerShellTransport::start(&self.shell_bin, &self.shell_args, self.timeout)?;
        let mut session = Session::new(
            credentials.clone(),
            Box::new(transport),
            self.layout.strategy(),
            now,
        );
        if !credentials.is_empty() {
            session.execute(&script::login_command(credentials))?;
            tracing::info!("session logged in");
        }
        Ok(session)
    }
}

impl Default for SessionBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use crate::error::TransportError;
    use crate::transport::Capture;

    use super::*;

    /// Transport that replays a script of canned replies.
    struct MockTransport {
        replies: VecDeque<Result<Capture, TransportError>>,
        terminated: bool,
    }

    impl MockTransport {
        fn new(replies: Vec<Result<Capture, TransportError>>) -> Self {
            Self {
                replies: replies.into(),
                terminated: false,
            }
        }

        fn ok(text: &str) -> Result<Capture, TransportError> {
            Ok(Capture {
                text: text.to_owned(),
                success: true,
            })
        }

        fn failed(text: &str) -> Result<Capture, TransportError> {
            Ok(Capture {
                text: text.to_owned(),
                success: false,
            })
        }
    }

    impl CommandTransport for MockTransport {
        fn execute(
            &mut self,
            _command: &str,
            _render: &str,
        ) -> Result<Capture, TransportError> {
            self.replies
                .pop_front()
                .unwrap_or(Err(TransportError::StreamClosed))
        }

        fn terminate(&mut self) {
            self.terminated = true;
        }
    }

    fn session(replies: Vec<Result<Capture, TransportError>>) -> Session {
        Session::new(
            Credentials::new().with("UserName", "admin"),
            Box::new(MockTransport::new(replies)),
            OutputLayout::Text.strategy(),
            Instant::now(),
        )
    }

    #[test]
    fn successful_output_is_parsed() {
        let mut session = session(vec![MockTransport::ok("Name : vm01\nStatus : Up\n")]);
        let output = session.execute("Get-Vm").expect("execute");
        let records = output.into_records();
        assert_eq!(records.len(), 1);
        assert!(!session.is_failed());
    }

    #[test]
    fn failed_command_becomes_execution_error() {
        let text = "Boom.\nAt line:1 char:1\n    + CategoryInfo : NotSpecified\n    + FullyQualifiedErrorId : SomeId\n";
        let mut session = session(vec![MockTransport::failed(text)]);
        let err = session.execute("Remove-Vm").expect_err("should fail");
        match &err {
            ShellError::Execution(exec) => {
                assert_eq!(exec.message, "Boom. At line:1 char:1");
                assert_eq!(exec.id, "SomeId");
            }
            other => panic!("expected execution error, got {other:?}"),
        }
        assert!(!err.is_fatal());
        assert!(!session.is_failed());
    }

    #[test]
    fn unparseable_output_is_nonfatal() {
        let mut session = session(vec![MockTransport::ok("Name : x\nnot a field line\n")]);
        let err = session.execute("Get-Vm").expect_err("should fail");
        assert!(matches!(err, ShellError::Parse(_)));
        assert!(!session.is_failed());
    }

    #[test]
    fn unparseable_error_text_is_nonfatal() {
        let mut session = session(vec![MockTransport::failed("garbage with no marker")]);
        let err = session.execute("Get-Vm").expect_err("should fail");
        assert!(matches!(err, ShellError::Parse(_)));
        assert!(!session.is_failed());
    }

    #[test]
    fn transport_failure_latches_failed() {
        let mut session = session(vec![Err(TransportError::StreamClosed)]);
        let err = session.execute("Get-Vm").expect_err("should fail");
        assert!(err.is_fatal());
        assert!(session.is_failed());
    }

    #[test]
    fn touch_advances_stamps_monotonically() {
        let start = Instant::now();
        let mut session = Session::new(
            Credentials::new(),
            Box::new(MockTransport::new(vec![])),
            OutputLayout::Text.strategy(),
            start,
        );
        assert_eq!(session.use_count(), 0);

        let later = start + Duration::from_secs(10);
        session.touch(later);
        assert_eq!(session.use_count(), 1);
        assert_eq!(session.idle(later), Duration::ZERO);
        assert_eq!(session.age(later), Duration::from_secs(10));

        // An earlier stamp never rolls the last-use time back.
        session.touch(start);
        assert_eq!(session.use_count(), 2);
        assert_eq!(session.idle(later), Duration::ZERO);
    }
}
