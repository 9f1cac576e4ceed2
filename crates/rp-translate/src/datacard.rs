//! Whitespace-separated datacard for ROC inputs.
//!
//! One column per sample. Supported lines:
//!
//! ```text
//! observable_type fixed            # or: poisson, poisson_density, poisson_ratio
//! response  responder non-responder responder ...
//! observable 1.2 3.4 0.7 ...       # fixed
//! count      3 0 12 ...            # poisson
//! num        3 0 12 ...            # poisson_density (with `area`)
//! area       1.5 2.0 0.8 ...
//! denom      4 2 9 ...             # poisson_ratio (with `num`)
//! scale      lnN   1.1 -   1.1 ... # multiplicative, shared per line
//! batch      gauss 0.2 0.2 -   ... # additive, shared per line
//! ```
//!
//! `#` starts a comment; blank lines, `---` separators and `bin` lines are
//! skipped. Every systematic line is one fully correlated source named after
//! its first column.

use std::path::Path;

use rp_core::{Error, Group, Result, Sample, Uncertainty, UncertaintyKind};

/// How the measurement columns are given.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObservableType {
    /// Real-valued measurement (`observable`).
    Fixed,
    /// Raw count (`count`), value `k`.
    Poisson,
    /// Count over an exposure (`num` / `area`), value `k / area`.
    PoissonDensity,
    /// Ratio of two counts (`num` / `denom`), both resampled.
    PoissonRatio,
}

impl ObservableType {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "fixed" => Some(Self::Fixed),
            "poisson" => Some(Self::Poisson),
            "poisson_density" => Some(Self::PoissonDensity),
            "poisson_ratio" => Some(Self::PoissonRatio),
            _ => None,
        }
    }

    fn accepts(self, key: &str) -> bool {
        matches!(
            (self, key),
            (Self::Fixed, "observable")
                | (Self::Poisson, "count")
                | (Self::PoissonDensity, "num")
                | (Self::PoissonDensity, "area")
                | (Self::PoissonRatio, "num")
                | (Self::PoissonRatio, "denom")
        )
    }
}

/// One systematic line.
#[derive(Debug, Clone, PartialEq)]
pub struct SystematicLine {
    /// Source name, also the correlation group.
    pub name: String,
    /// `LogNormal` (`lnN`) or `Gaussian` (`gauss`).
    pub kind: UncertaintyKind,
    /// Per-sample scale, `None` where the column is `-`.
    pub values: Vec<Option<f64>>,
    /// 1-based line number.
    pub line: usize,
}

/// Parsed datacard.
#[derive(Debug, Clone, PartialEq)]
pub struct Datacard {
    /// Measurement layout.
    pub observable_type: ObservableType,
    /// Group of every column.
    pub responses: Vec<Group>,
    /// `observable` values (fixed).
    pub observables: Option<Vec<f64>>,
    /// `count` / `num` values.
    pub counts: Option<Vec<u64>>,
    /// `area` values (poisson_density).
    pub areas: Option<Vec<f64>>,
    /// `denom` values (poisson_ratio).
    pub denominators: Option<Vec<u64>>,
    /// Systematic sources in file order.
    pub systematics: Vec<SystematicLine>,
}

fn parse_err(line: usize, message: impl Into<String>) -> Error {
    Error::Parse { line, message: message.into() }
}

fn parse_column<T: std::str::FromStr>(line: usize, key: &str, tok: &str) -> Result<T> {
    tok.parse().map_err(|_| parse_err(line, format!("invalid {key} value '{tok}'")))
}

#[derive(Default)]
struct Builder {
    observable_type: Option<ObservableType>,
    responses: Option<Vec<Group>>,
    observables: Option<Vec<f64>>,
    counts: Option<Vec<u64>>,
    areas: Option<Vec<f64>>,
    denominators: Option<Vec<u64>>,
    systematics: Vec<SystematicLine>,
}

impl Builder {
    fn n_samples(&self, line: usize, key: &str) -> Result<usize> {
        if self.observable_type.is_none() {
            return Err(parse_err(line, format!("'{key}' before 'observable_type'")));
        }
        self.responses
            .as_ref()
            .map(Vec::len)
            .ok_or_else(|| parse_err(line, format!("'{key}' before 'response'")))
    }

    fn check_len(line: usize, key: &str, got: usize, expected: usize) -> Result<()> {
        if got != expected {
            return Err(parse_err(
                line,
                format!("{got} {key} values for {expected} samples"),
            ));
        }
        Ok(())
    }

    fn line(&mut self, line: usize, tokens: &[&str]) -> Result<()> {
        let (key, rest) = match tokens.split_first() {
            Some((k, r)) => (*k, r),
            None => return Ok(()),
        };
        match key {
            "bin" => Ok(()),
            "observable_type" => {
                let [ty] = rest else {
                    return Err(parse_err(line, "observable_type takes exactly one value"));
                };
                if self.observable_type.is_some() {
                    return Err(parse_err(line, "duplicate 'observable_type'"));
                }
                let ty = ObservableType::parse(ty)
                    .ok_or_else(|| parse_err(line, format!("unknown observable_type '{ty}'")))?;
                self.observable_type = Some(ty);
                Ok(())
            }
            "response" => {
                if self.responses.is_some() {
                    return Err(parse_err(line, "duplicate 'response' line"));
                }
                if rest.is_empty() {
                    return Err(parse_err(line, "empty 'response' line"));
                }
                let groups = rest
                    .iter()
                    .map(|r| match *r {
                        "responder" => Ok(Group::Responder),
                        "non-responder" => Ok(Group::NonResponder),
                        other => Err(parse_err(line, format!("invalid response '{other}'"))),
                    })
                    .collect::<Result<Vec<_>>>()?;
                self.responses = Some(groups);
                Ok(())
            }
            "observable" | "count" | "num" | "area" | "denom" => self.measurement(line, key, rest),
            _ => match rest.split_first() {
                Some((&"lnN", values)) => self.systematic(line, key, UncertaintyKind::LogNormal, values),
                Some((&"gauss", values)) => self.systematic(line, key, UncertaintyKind::Gaussian, values),
                _ => Err(parse_err(line, format!("unexpected line starting with '{key}'"))),
            },
        }
    }

    fn measurement(&mut self, line: usize, key: &str, rest: &[&str]) -> Result<()> {
        let n = self.n_samples(line, key)?;
        let ty = self.observable_type.unwrap_or(ObservableType::Fixed);
        if !ty.accepts(key) {
            return Err(parse_err(line, format!("'{key}' line not valid for observable_type {ty:?}")));
        }
        Self::check_len(line, key, rest.len(), n)?;
        match key {
            "observable" => {
                let v = rest
                    .iter()
                    .map(|t| {
                        let x: f64 = parse_column(line, key, t)?;
                        if x.is_finite() { Ok(x) } else { Err(parse_err(line, format!("non-finite {key} '{t}'"))) }
                    })
                    .collect::<Result<Vec<_>>>()?;
                set_once(&mut self.observables, v, line, key)
            }
            "count" | "num" => {
                let v = rest.iter().map(|t| parse_column::<u64>(line, key, t)).collect::<Result<Vec<_>>>()?;
                set_once(&mut self.counts, v, line, key)
            }
            "denom" => {
                let v = rest
                    .iter()
                    .map(|t| match parse_column::<u64>(line, key, t)? {
                        0 => Err(parse_err(line, "denom must be > 0")),
                        d => Ok(d),
                    })
                    .collect::<Result<Vec<_>>>()?;
                set_once(&mut self.denominators, v, line, key)
            }
            _ => {
                let v = rest
                    .iter()
                    .map(|t| {
                        let a: f64 = parse_column(line, key, t)?;
                        if a.is_finite() && a > 0.0 {
                            Ok(a)
                        } else {
                            Err(parse_err(line, format!("area must be > 0, got '{t}'")))
                        }
                    })
                    .collect::<Result<Vec<_>>>()?;
                set_once(&mut self.areas, v, line, key)
            }
        }
    }

    fn systematic(&mut self, line: usize, name: &str, kind: UncertaintyKind, rest: &[&str]) -> Result<()> {
        let n = self.n_samples(line, name)?;
        Self::check_len(line, name, rest.len(), n)?;
        if self.systematics.iter().any(|s| s.name == name) {
            return Err(parse_err(line, format!("duplicate systematic '{name}'")));
        }
        let values = rest
            .iter()
            .map(|t| {
                if *t == "-" {
                    return Ok(None);
                }
                let v: f64 = parse_column(line, name, t)?;
                let u = Uncertainty { kind, scale: v, correlation_group: None };
                u.validate().map_err(|e| parse_err(line, e.to_string()))?;
                Ok(Some(v))
            })
            .collect::<Result<Vec<_>>>()?;
        self.systematics.push(SystematicLine { name: name.to_string(), kind, values, line });
        Ok(())
    }

    fn finish(self, last_line: usize) -> Result<Datacard> {
        let observable_type =
            self.observable_type.ok_or_else(|| parse_err(last_line, "no 'observable_type' line"))?;
        let responses = self.responses.ok_or_else(|| parse_err(last_line, "no 'response' line"))?;
        let missing = |what: &str| parse_err(last_line, format!("no '{what}' line"));
        match observable_type {
            ObservableType::Fixed if self.observables.is_none() => return Err(missing("observable")),
            ObservableType::Poisson if self.counts.is_none() => return Err(missing("count")),
            ObservableType::PoissonDensity if self.counts.is_none() => return Err(missing("num")),
            ObservableType::PoissonDensity if self.areas.is_none() => return Err(missing("area")),
            ObservableType::PoissonRatio if self.counts.is_none() => return Err(missing("num")),
            ObservableType::PoissonRatio if self.denominators.is_none() => return Err(missing("denom")),
            _ => {}
        }
        Ok(Datacard {
            observable_type,
            responses,
            observables: self.observables,
            counts: self.counts,
            areas: self.areas,
            denominators: self.denominators,
            systematics: self.systematics,
        })
    }
}

fn set_once<T>(slot: &mut Option<T>, value: T, line: usize, key: &str) -> Result<()> {
    if slot.is_some() {
        return Err(parse_err(line, format!("duplicate '{key}' line")));
    }
    *slot = Some(value);
    Ok(())
}

impl Datacard {
    /// Parse datacard text.
    pub fn parse_str(text: &str) -> Result<Self> {
        let mut b = Builder::default();
        let mut last_line = 0;
        for (i, raw) in text.lines().enumerate() {
            let line_no = i + 1;
            last_line = line_no;
            let line = raw.split('#').next().unwrap_or("").trim();
            if line.is_empty() || line.starts_with("---") {
                continue;
            }
            let tokens: Vec<&str> = line.split_whitespace().collect();
            b.line(line_no, &tokens)?;
        }
        let card = b.finish(last_line)?;
        log::debug!(
            "datacard: {} samples ({} responders), {:?}, {} systematic(s)",
            card.len(),
            card.responses.iter().filter(|g| **g == Group::Responder).count(),
            card.observable_type,
            card.systematics.len()
        );
        Ok(card)
    }

    /// Read and parse a datacard file.
    pub fn parse_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::parse_str(&text)
    }

    /// Number of sample columns.
    pub fn len(&self) -> usize {
        self.responses.len()
    }

    /// `true` when the card has no columns (never for a parsed card).
    pub fn is_empty(&self) -> bool {
        self.responses.is_empty()
    }

    /// One [`Sample`] per column with its uncertainties attached.
    ///
    /// Count-based columns carry a Poisson source first, so systematics act
    /// on the resampled value.
    pub fn samples(&self) -> Result<Vec<Sample>> {
        let mut out = Vec::with_capacity(self.len());
        for (i, &group) in self.responses.iter().enumerate() {
            let mut sample = match self.observable_type {
                ObservableType::Fixed => {
                    let v = column(&self.observables, i, "observable")?;
                    Sample::new(v, group)
                }
                ObservableType::Poisson => {
                    let k = column(&self.counts, i, "count")? as f64;
                    Sample::new(k, group).with_uncertainty(Uncertainty::poisson(1.0))
                }
                ObservableType::PoissonDensity => {
                    let k = column(&self.counts, i, "num")? as f64;
                    let area = column(&self.areas, i, "area")?;
                    Sample::new(k / area, group).with_uncertainty(Uncertainty::poisson(area))
                }
                ObservableType::PoissonRatio => {
                    let k = column(&self.counts, i, "num")? as f64;
                    let d = column(&self.denominators, i, "denom")? as f64;
                    Sample::new(k / d, group).with_uncertainty(Uncertainty::poisson_ratio(d))
                }
            };
            for s in &self.systematics {
                if let Some(scale) = s.values[i] {
                    let u = Uncertainty { kind: s.kind, scale, correlation_group: None };
                    sample = sample.with_uncertainty(u.correlated(&s.name));
                }
            }
            out.push(sample);
        }
        Ok(out)
    }
}

fn column<T: Copy>(values: &Option<Vec<T>>, i: usize, key: &str) -> Result<T> {
    values
        .as_ref()
        .and_then(|v| v.get(i).copied())
        .ok_or_else(|| Error::Validation(format!("datacard has no '{key}' value for column {i}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const FIXED: &str = "\
# two batches
observable_type fixed
bin        a a a a
response   responder non-responder responder non-responder
---
observable 1.0 2.5 0.5 4.0
scale      lnN   1.1 1.1 -   1.2
";

    #[test]
    fn test_fixed_card() {
        let card = Datacard::parse_str(FIXED).unwrap();
        assert_eq!(card.observable_type, ObservableType::Fixed);
        assert_eq!(card.len(), 4);
        assert_eq!(card.responses[1], Group::NonResponder);

        let samples = card.samples().unwrap();
        assert_eq!(samples[1].value, 2.5);
        assert_eq!(samples[2].uncertainties.len(), 0);
        let u = &samples[3].uncertainties[0];
        assert_eq!(u.kind, UncertaintyKind::LogNormal);
        assert_eq!(u.scale, 1.2);
        assert_eq!(u.correlation_group.as_deref(), Some("scale"));
    }

    #[test]
    fn test_poisson_density_card() {
        let text = "\
observable_type poisson_density
response responder non-responder
num  3 10
area 1.5 2.0
drift gauss 0.1 -
";
        let samples = Datacard::parse_str(text).unwrap().samples().unwrap();
        assert_relative_eq!(samples[0].value, 2.0);
        assert_relative_eq!(samples[1].value, 5.0);
        assert_eq!(samples[0].uncertainties[0], Uncertainty::poisson(1.5));
        assert_eq!(samples[0].uncertainties[1].kind, UncertaintyKind::Gaussian);
        assert_eq!(samples[1].uncertainties.len(), 1);
    }

    #[test]
    fn test_poisson_counts() {
        let text = "observable_type poisson\nresponse responder non-responder\ncount 0 7\n";
        let samples = Datacard::parse_str(text).unwrap().samples().unwrap();
        assert_eq!(samples[0].value, 0.0);
        assert_eq!(samples[1].uncertainties, vec![Uncertainty::poisson(1.0)]);
    }

    #[test]
    fn test_poisson_ratio_card() {
        let text = "\
observable_type poisson_ratio
response responder non-responder responder
num   6 0 5
denom 3 4 2
scale lnN 1.1 1.1 -
";
        let card = Datacard::parse_str(text).unwrap();
        assert_eq!(card.observable_type, ObservableType::PoissonRatio);
        assert_eq!(card.denominators, Some(vec![3, 4, 2]));
        let samples = card.samples().unwrap();
        assert_relative_eq!(samples[0].value, 2.0);
        assert_eq!(samples[1].value, 0.0);
        assert_relative_eq!(samples[2].value, 2.5);
        assert_eq!(samples[0].uncertainties[0], Uncertainty::poisson_ratio(3.0));
        assert_eq!(samples[0].uncertainties[1].kind, UncertaintyKind::LogNormal);
        assert_eq!(samples[2].uncertainties.len(), 1);
    }

    #[test]
    fn test_poisson_ratio_needs_positive_denominators() {
        let head = "observable_type poisson_ratio\nresponse responder non-responder\n";
        assert_eq!(err_line(&format!("{head}num 1 2\ndenom 3 0\n")), 4);
        assert_eq!(err_line(&format!("{head}num 1 2\n")), 3);
        assert_eq!(err_line(&format!("{head}num 1 2\narea 1.0 2.0\n")), 4);
    }

    fn err_line(text: &str) -> usize {
        match Datacard::parse_str(text) {
            Err(Error::Parse { line, .. }) => line,
            other => panic!("expected parse error, got {other:?}"),
        }
    }

    #[test]
    fn test_errors_carry_line_numbers() {
        assert_eq!(err_line("observable_type fixed\nresponse responder maybe\n"), 2);
        assert_eq!(err_line("observable_type fixed\nresponse responder\nobservable 1 2\n"), 3);
        assert_eq!(err_line("response responder\n"), 1);
        assert_eq!(err_line("observable_type fixed\nresponse responder\ncount 1\n"), 3);
        assert_eq!(err_line("observable_type poisson\nresponse responder\ncount 1.5\n"), 3);
        assert_eq!(err_line("observable_type fixed\nresponse responder\nobservable 1\ns lnN 0\n"), 4);
        assert_eq!(err_line("observable_type fixed\nresponse responder\nobservable 1\nwhat is this\n"), 4);
        assert_eq!(err_line("observable_type fixed\nresponse responder\n"), 2);
    }

    #[test]
    fn test_duplicate_lines_rejected() {
        let text = "observable_type fixed\nresponse responder\nobservable 1\nobservable 2\n";
        assert_eq!(err_line(text), 4);
        let text = "observable_type fixed\nresponse responder\nobservable 1\ns lnN 1.1\ns lnN 1.2\n";
        assert_eq!(err_line(text), 5);
    }
}
