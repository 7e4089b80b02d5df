use rollcall_imaging::{QualityDecision, QualityPolicy, Rejection};
use std::io::{BufRead, Write};
use std::time::Duration;

/// Asks the operator what to do with a rejected photo.
///
/// `yes` means the photo was replaced and the folder should be rescanned,
/// `no` ends the run, and `skip` drops just this photo. End of input is
/// treated as `no`.
pub struct ConsolePolicy<R, W> {
    input: R,
    output: W,
    delay: Duration,
}

impl ConsolePolicy<std::io::StdinLock<'static>, std::io::Stdout> {
    pub fn stdio(delay: Duration) -> Self {
        Self::new(std::io::stdin().lock(), std::io::stdout(), delay)
    }
}

impl<R: BufRead, W: Write> ConsolePolicy<R, W> {
    pub fn new(input: R, output: W, delay: Duration) -> Self {
        Self { input, output, delay }
    }

    fn ask(&mut self, photo: &str, reason: &Rejection) -> std::io::Result<QualityDecision> {
        writeln!(self.output, "{photo}: {reason}")?;
        loop {
            write!(self.output, "Do you want to upload another photo? (yes/no/skip) ")?;
            self.output.flush()?;

            let mut line = String::new();
            if self.input.read_line(&mut line)? == 0 {
                return Ok(QualityDecision::Abort);
            }
            match line.trim().to_ascii_lowercase().as_str() {
                "y" | "yes" => return Ok(QualityDecision::Retry),
                "n" | "no" => return Ok(QualityDecision::Abort),
                "s" | "skip" => return Ok(QualityDecision::Skip),
                _ => writeln!(self.output, "Please answer yes, no or skip.")?,
            }
        }
    }
}

impl<R: BufRead, W: Write> QualityPolicy for ConsolePolicy<R, W> {
    fn on_quality_failure(&mut self, photo: &str, reason: &Rejection) -> QualityDecision {
        // Give the operator time to look at the saved preview.
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        match self.ask(photo, reason) {
            Ok(decision) => decision,
            Err(e) => {
                tracing::warn!(error = %e, "console prompt failed; aborting run");
                QualityDecision::Abort
            }
        }
    }
}
