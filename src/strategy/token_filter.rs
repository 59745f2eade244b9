//! Token Filter
//!
//! Stateless eligibility screen. Every criterion must hold; the first one
//! that fails is reported for debug logging.

use std::fmt;

use crate::domain::Token;
use crate::strategy::params::FilterThresholds;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Criterion {
    Age,
    Volume24h,
    Liquidity,
    Fdv,
}

impl fmt::Display for Criterion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Criterion::Age => "age",
            Criterion::Volume24h => "24h volume",
            Criterion::Liquidity => "liquidity",
            Criterion::Fdv => "fdv",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Screening {
    Eligible,
    Rejected {
        criterion: Criterion,
        value: f64,
        threshold: f64,
    },
}

impl Screening {
    pub fn is_eligible(&self) -> bool {
        matches!(self, Screening::Eligible)
    }
}

impl fmt::Display for Screening {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Screening::Eligible => f.write_str("eligible"),
            Screening::Rejected { criterion, value, threshold } => {
                write!(f, "{} {:.0} < {:.0}", criterion, value, threshold)
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct TokenFilter {
    thresholds: FilterThresholds,
}

impl TokenFilter {
    pub fn new(thresholds: FilterThresholds) -> Self {
        Self { thresholds }
    }

    pub fn thresholds(&self) -> &FilterThresholds {
        &self.thresholds
    }

    pub fn screen(&self, token: &Token) -> Screening {
        let t = &self.thresholds;
        let checks = [
            (Criterion::Age, token.age_hours, t.min_age_hours),
            (Criterion::Volume24h, token.volume_24h, t.min_volume_24h),
            (Criterion::Liquidity, token.liquidity, t.min_liquidity),
            (Criterion::Fdv, token.fdv, t.min_fdv),
        ];
        for (criterion, value, threshold) in checks {
            // NaN never passes
            if !(value >= threshold) {
                return Screening::Rejected { criterion, value, threshold };
            }
        }
        Screening::Eligible
    }

    /// Screen a discovery snapshot, returning eligible tokens with the flag set
    pub fn filter(&self, tokens: Vec<Token>) -> Vec<Token> {
        let total = tokens.len();
        let eligible: Vec<Token> = tokens
            .into_iter()
            .filter_map(|mut token| match self.screen(&token) {
                Screening::Eligible => {
                    token.eligible = true;
                    Some(token)
                }
                rejected => {
                    tracing::debug!("{} rejected: {}", token.symbol, rejected);
                    None
                }
            })
            .collect();
        tracing::debug!("Token filter: {}/{} eligible", eligible.len(), total);
        eligible
    }
}
