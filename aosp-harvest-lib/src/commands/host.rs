use std::io::Write;

/// Where a command writes its results, so tests can capture them.
pub trait Host: Send + Sync {
    /// Normal output, such as stdout.
    fn output(&mut self) -> impl Write;

    /// Diagnostics, such as stderr.
    fn error(&mut self) -> impl Write;

    /// Terminate the process; a test host may only record the request.
    fn exit(&mut self, code: i32);
}

/// Host that captures output to in-memory buffers
#[cfg(test)]
pub struct TestHost {
    pub output_buf: Vec<u8>,
    pub error_buf: Vec<u8>,
    pub exit_code: Option<i32>,
}

#[cfg(test)]
impl TestHost {
    pub const fn new() -> Self {
        Self {
            output_buf: Vec::new(),
            error_buf: Vec::new(),
            exit_code: None,
        }
    }
}

#[cfg(test)]
impl Host for TestHost {
    fn output(&mut self) -> impl Write {
        std::io::Cursor::new(&mut self.output_buf)
    }

    fn error(&mut self) -> impl Write {
        std::io::Cursor::new(&mut self.error_buf)
    }

    fn exit(&mut self, code: i32) {
        self.exit_code = Some(code);
    }
}
