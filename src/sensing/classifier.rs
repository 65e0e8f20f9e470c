use std::{
    io::{BufRead, BufReader, Write},
    process::{Child, ChildStdin, ChildStdout, Command, Stdio},
};

use crate::error::{HmpError, Result};

use super::sample::ImuSample;

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_info, log_warn};

/// External window classifier: turns a full window of samples into one
/// possibility per model, in model-set order.
pub trait WindowClassifier {
    fn model_count(&self) -> usize;

    fn window_size(&self) -> usize;

    fn classify(&mut self, window: &[ImuSample]) -> Result<Vec<f32>>;
}

impl<C: WindowClassifier + ?Sized> WindowClassifier for Box<C> {
    fn model_count(&self) -> usize {
        (**self).model_count()
    }

    fn window_size(&self) -> usize {
        (**self).window_size()
    }

    fn classify(&mut self, window: &[ImuSample]) -> Result<Vec<f32>> {
        (**self).classify(window)
    }
}

/// Runs the classifier as a child process speaking a line protocol.
///
/// Per window it receives `W <n>` followed by `n` lines of
/// `ax ay az gx gy gz`, and answers with one line of whitespace-separated
/// possibilities.
pub struct ProcessClassifier {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
    model_count: usize,
    window_size: usize,
    response: String,
}

impl ProcessClassifier {
    pub fn spawn(command: &str, window_size: usize, model_count: usize) -> Result<Self> {
        let mut parts = command.split_whitespace();
        let program = parts
            .next()
            .ok_or_else(|| HmpError::Configuration("classifier command is empty".into()))?;

        let mut child = Command::new(program)
            .args(parts)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|err| HmpError::Classifier(format!("failed to start {program}: {err}")))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| HmpError::Classifier("classifier stdin unavailable".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| HmpError::Classifier("classifier stdout unavailable".into()))?;

        log_info!("classifier {program} started (pid {})", child.id());

        Ok(Self {
            child,
            stdin,
            stdout: BufReader::new(stdout),
            model_count,
            window_size: window_size.max(1),
            response: String::new(),
        })
    }

    fn send_window(&mut self, window: &[ImuSample]) -> std::io::Result<()> {
        writeln!(self.stdin, "W {}", window.len())?;
        for sample in window {
            let [ax, ay, az] = sample.accel();
            let [gx, gy, gz] = sample.gyro();
            writeln!(self.stdin, "{ax} {ay} {az} {gx} {gy} {gz}")?;
        }
        self.stdin.flush()
    }
}

impl WindowClassifier for ProcessClassifier {
    fn model_count(&self) -> usize {
        self.model_count
    }

    fn window_size(&self) -> usize {
        self.window_size
    }

    fn classify(&mut self, window: &[ImuSample]) -> Result<Vec<f32>> {
        self.send_window(window)
            .map_err(|err| HmpError::Classifier(format!("write to classifier failed: {err}")))?;

        self.response.clear();
        let read = self
            .stdout
            .read_line(&mut self.response)
            .map_err(|err| HmpError::Classifier(format!("read from classifier failed: {err}")))?;
        if read == 0 {
            return Err(HmpError::Classifier("classifier exited".into()));
        }

        let possibilities = parse_possibilities(&self.response)?;
        if possibilities.len() != self.model_count {
            return Err(HmpError::DimensionMismatch {
                expected: self.model_count,
                actual: possibilities.len(),
            });
        }
        Ok(possibilities)
    }
}

impl Drop for ProcessClassifier {
    fn drop(&mut self) {
        if let Err(err) = self.child.kill() {
            log_warn!("failed to stop classifier process: {err}");
        }
        let _ = self.child.wait();
    }
}

/// Whitespace-separated possibilities, one per model.
pub fn parse_possibilities(line: &str) -> Result<Vec<f32>> {
    let values = line
        .split_whitespace()
        .map(|token| {
            token
                .parse::<f32>()
                .map_err(|_| HmpError::malformed(line.trim_end(), format!("invalid possibility {token:?}")))
        })
        .collect::<Result<Vec<f32>>>()?;
    if values.is_empty() {
        return Err(HmpError::malformed(line.trim_end(), "no possibilities"));
    }
    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_possibility_lines() {
        assert_eq!(parse_possibilities("0.1 0.5\t0.9\n").unwrap(), vec![0.1, 0.5, 0.9]);
        assert!(parse_possibilities("0.1 nope").is_err());
        assert!(parse_possibilities("  \n").is_err());
    }

    #[test]
    fn empty_command_is_a_configuration_error() {
        assert!(matches!(
            ProcessClassifier::spawn("   ", 4, 2),
            Err(HmpError::Configuration(_))
        ));
    }

    #[cfg(unix)]
    #[test]
    fn talks_to_a_child_process() {
        // Reads the window header and rows, answers with a fixed vector.
        let script = "while read -r tag n; do i=0; while [ $i -lt $n ]; do read -r row; i=$((i+1)); done; echo 0.25 0.75; done\n";
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("classifier.sh");
        std::fs::write(&path, script).unwrap();

        let mut classifier =
            ProcessClassifier::spawn(&format!("sh {}", path.display()), 2, 2).unwrap();
        let window = vec![ImuSample::parse("H 1 2 3 4 5 6 Still").unwrap(); 2];

        assert_eq!(classifier.classify(&window).unwrap(), vec![0.25, 0.75]);
        assert_eq!(classifier.classify(&window).unwrap(), vec![0.25, 0.75]);
    }
}
