use serde::{Deserialize, Serialize};

use crate::error::{HmpError, Result};

pub const MOTION_TAG: char = 'H';

/// One reading from the wrist device: `H ax ay az gx gy gz motion`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImuSample {
    pub ax: i32,
    pub ay: i32,
    pub az: i32,
    pub gx: i32,
    pub gy: i32,
    pub gz: i32,
    /// Device-side motion level flag, passed through untouched
    pub motion: String,
}

impl ImuSample {
    pub fn parse(line: &str) -> Result<Self> {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        let [tag, ax, ay, az, gx, gy, gz, motion] = tokens.as_slice() else {
            return Err(HmpError::malformed(
                line,
                format!("expected 8 tokens, got {}", tokens.len()),
            ));
        };
        if *tag != "H" {
            return Err(HmpError::malformed(line, "not a motion sample"));
        }

        let axis = |token: &str| {
            token
                .parse::<i32>()
                .map_err(|_| HmpError::malformed(line, format!("invalid axis value {token:?}")))
        };

        Ok(Self {
            ax: axis(*ax)?,
            ay: axis(*ay)?,
            az: axis(*az)?,
            gx: axis(*gx)?,
            gy: axis(*gy)?,
            gz: axis(*gz)?,
            motion: motion.to_string(),
        })
    }

    pub fn accel(&self) -> [i32; 3] {
        [self.ax, self.ay, self.az]
    }

    pub fn gyro(&self) -> [i32; 3] {
        [self.gx, self.gy, self.gz]
    }
}
