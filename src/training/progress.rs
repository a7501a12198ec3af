use std::io::Write;

/// Reports training progress on a single line that is overwritten on every
/// update.
pub struct StatusLine {
    out: Box<dyn Write + Send>,
    log_interval: usize,
}

impl std::fmt::Debug for StatusLine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatusLine").field("log_interval", &self.log_interval).finish()
    }
}

impl StatusLine {
    pub fn new(out: Box<dyn Write + Send>, log_interval: usize) -> Self {
        Self { out, log_interval: log_interval.max(1) }
    }

    pub fn stdout(log_interval: usize) -> Self {
        Self::new(Box::new(std::io::stdout()), log_interval)
    }

    pub fn sink() -> Self {
        Self::new(Box::new(std::io::sink()), 1)
    }

    /// Writes the status line when `step` falls on the log interval.
    pub fn update(&mut self, epoch: usize, step: usize, d_loss: f64, g_loss: f64) -> std::io::Result<()> {
        if step % self.log_interval != 0 {
            return Ok(());
        }
        write!(
            self.out,
            "\rEpoch [{epoch}], Batch[{step}] - d_loss: {d_loss:.6}, g_loss: {g_loss:.6}"
        )?;
        self.out.flush()
    }

    /// Moves past the status line, e.g. before an epoch summary is logged.
    pub fn finish(&mut self) -> std::io::Result<()> {
        writeln!(self.out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct Shared(Arc<Mutex<Vec<u8>>>);

    impl Write for Shared {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn writes_on_the_interval() {
        let shared = Shared::default();
        let mut status = StatusLine::new(Box::new(shared.clone()), 2);
        for step in 1..=4 {
            status.update(3, step, 0.5, 1.25).unwrap();
        }
        let text = String::from_utf8(shared.0.lock().unwrap().clone()).unwrap();
        assert_eq!(
            text,
            "\rEpoch [3], Batch[2] - d_loss: 0.500000, g_loss: 1.250000\
             \rEpoch [3], Batch[4] - d_loss: 0.500000, g_loss: 1.250000"
        );
    }
}
