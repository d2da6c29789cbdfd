use std::str::FromStr;

use colored::Colorize;

use crate::Error;

/// Norm used to reduce the element-wise difference of two series.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Norm {
    L1,
    #[default]
    L2,
    LInf,
}

impl FromStr for Norm {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self, Error> {
        match s {
            "l1" => Ok(Self::L1),
            "l2" => Ok(Self::L2),
            "linf" => Ok(Self::LInf),
            other => Err(Error::UnknownNorm(other.to_owned())),
        }
    }
}

impl std::fmt::Display for Norm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::L1 => "l1",
            Self::L2 => "l2",
            Self::LInf => "linf",
        };
        write!(f, "{s}")
    }
}

/// Norm + threshold a comparison must stay within.
/// The default is exact equality under the L2 norm.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Tolerance {
    pub norm: Norm,
    pub threshold: f64,
}

/// Outcome of comparing one declared output variable.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationResult {
    pub step: String,
    pub variable: String,
    pub norm: Norm,
    pub threshold: f64,
    /// Computed norm of the difference, when a comparison ran.
    pub value: Option<f64>,
    pub passed: bool,
    /// Why the comparison failed without a computed value
    /// (missing output, length mismatch).
    pub detail: Option<String>,
}

impl ValidationResult {
    pub fn outcome(step: &str, variable: &str, tol: Tolerance, value: f64) -> Self {
        Self {
            step: step.to_owned(),
            variable: variable.to_owned(),
            norm: tol.norm,
            threshold: tol.threshold,
            value: Some(value),
            passed: value <= tol.threshold,
            detail: None,
        }
    }

    pub fn fail(step: &str, variable: &str, tol: Tolerance, detail: String) -> Self {
        Self {
            step: step.to_owned(),
            variable: variable.to_owned(),
            norm: tol.norm,
            threshold: tol.threshold,
            value: None,
            passed: false,
            detail: Some(detail),
        }
    }

    /// One status line for the run report.
    pub fn summary(&self) -> String {
        let status = if self.passed {
            "PASS".green()
        } else {
            "FAIL".red()
        };
        match (&self.value, &self.detail) {
            (Some(v), _) => format!(
                "{status} {}:{} ({} = {:.3e}, threshold {:.3e})",
                self.step, self.variable, self.norm, v, self.threshold
            ),
            (None, Some(d)) => format!("{status} {}:{} ({d})", self.step, self.variable),
            (None, None) => format!("{status} {}:{}", self.step, self.variable),
        }
    }
}

/// Parse an output data file: one `name = v1 v2 v3 ...` series per line,
/// `#` comments and blank lines ignored.
pub fn parse_series(path: &str, text: &str) -> Result<Vec<(String, Vec<f64>)>, Error> {
    let mut series = Vec::with_capacity(8);
    for (lineno, raw) in text.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let invalid = || Error::InvalidSeries {
            path: path.to_owned(),
            line: lineno + 1,
            text: line.to_owned(),
        };

        let (name, values) = line.split_once('=').ok_or_else(invalid)?;
        let values = values
            .split_whitespace()
            .map(|v| v.parse().map_err(|_| invalid()))
            .collect::<Result<Vec<f64>, _>>()?;
        series.push((name.trim().to_owned(), values));
    }
    Ok(series)
}

/// Compare one variable's series against a reference series.
pub fn compare_series(
    step: &str,
    variable: &str,
    ours: &[f64],
    reference: &[f64],
    tol: Tolerance,
) -> ValidationResult {
    if ours.len() != reference.len() {
        return ValidationResult::fail(
            step,
            variable,
            tol,
            format!("length mismatch: {} vs {}", ours.len(), reference.len()),
        );
    }

    let diff = ours.iter().zip(reference).map(|(a, b)| (a - b).abs());
    let value = match tol.norm {
        Norm::L1 => diff.sum(),
        Norm::L2 => diff.map(|d| d * d).sum::<f64>().sqrt(),
        Norm::LInf => diff.fold(0.0, f64::max),
    };
    ValidationResult::outcome(step, variable, tol, value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_series() {
        let series = parse_series(
            "result.dat",
            "# solver output\ntemperature = 1.0 2.0 3.0\npressure = 0.5\n",
        )
        .unwrap();
        assert_eq!(series.len(), 2);
        assert_eq!(series[0].0, "temperature");
        assert_eq!(series[0].1, vec![1.0, 2.0, 3.0]);
        assert_eq!(series[1].0, "pressure");
    }

    #[test]
    fn test_parse_series_reports_bad_line() {
        match parse_series("result.dat", "temperature 1.0\n").unwrap_err() {
            Error::InvalidSeries { path, line, .. } => {
                assert_eq!(path, "result.dat");
                assert_eq!(line, 1);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_exact_equality_default() {
        let r = compare_series("s", "v", &[1.0, 2.0], &[1.0, 2.0], Tolerance::default());
        assert!(r.passed);
        assert_eq!(r.value, Some(0.0));
    }

    #[test]
    fn test_threshold_sensitivity() {
        let tol = Tolerance {
            norm: Norm::L2,
            threshold: 1e-3,
        };
        let within = compare_series("s", "v", &[1.0, 2.0], &[1.0, 2.0005], tol);
        assert!(within.passed);

        let beyond = compare_series("s", "v", &[1.0, 2.0], &[1.0, 2.01], tol);
        assert!(!beyond.passed);
        assert_eq!(beyond.variable, "v");
        assert!(beyond.value.unwrap() > 1e-3);
    }

    #[test]
    fn test_norm_values() {
        let tol = |norm| Tolerance {
            norm,
            threshold: 0.0,
        };
        let a = [0.0, 0.0];
        let b = [3.0, 4.0];
        assert_eq!(compare_series("s", "v", &a, &b, tol(Norm::L1)).value, Some(7.0));
        assert_eq!(compare_series("s", "v", &a, &b, tol(Norm::L2)).value, Some(5.0));
        assert_eq!(compare_series("s", "v", &a, &b, tol(Norm::LInf)).value, Some(4.0));
    }

    #[test]
    fn test_length_mismatch_fails() {
        let r = compare_series("s", "v", &[1.0], &[1.0, 2.0], Tolerance::default());
        assert!(!r.passed);
        assert!(r.detail.unwrap().contains("length mismatch"));
    }
}
