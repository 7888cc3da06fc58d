mod session;

pub use session::{
    Attempt, DEFAULT_DEBOUNCE, Resolved, ResolutionSession, SessionEvent, SessionState, Signature,
    Suppressed,
};

use std::fmt;

use tracing::warn;
use ulid::Ulid;

use crate::model::*;
use crate::observability;

/// One resolution attempt's input.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PriceQuery {
    pub package_id: Ulid,
    /// Square metres.
    pub area: f64,
    /// Visits per cycle. Signed so that bad input can be represented and rejected.
    pub frequency: i64,
}

impl PriceQuery {
    pub fn new(package_id: Ulid, area: f64, frequency: i64) -> Self {
        Self {
            package_id,
            area,
            frequency,
        }
    }

    fn validate(&self) -> Result<u32, ValidationError> {
        // `!(x > 0)` also rejects NaN
        if !(self.area > 0.0) {
            return Err(ValidationError::NonPositiveArea(self.area));
        }
        if self.frequency <= 0 {
            return Err(ValidationError::NonPositiveFrequency(self.frequency));
        }
        u32::try_from(self.frequency).map_err(|_| ValidationError::NonPositiveFrequency(self.frequency))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PriceQuote {
    pub price: Price,
    pub required_staff: u32,
    pub estimated_hours: Option<f64>,
    /// Index of the matched tier; `None` for fixed packages.
    pub tier: Option<usize>,
    /// Malformed catalog data encountered while resolving. The quote is still
    /// usable; these are for operator diagnosis.
    pub integrity: Vec<IntegrityIssue>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PriceResolution {
    Found(PriceQuote),
    NotFound(Miss),
}

impl PriceResolution {
    pub fn found(&self) -> bool {
        matches!(self, PriceResolution::Found(_))
    }

    pub fn price(&self) -> Option<Price> {
        match self {
            PriceResolution::Found(q) => Some(q.price),
            PriceResolution::NotFound(_) => None,
        }
    }

    pub fn quote(&self) -> Option<&PriceQuote> {
        match self {
            PriceResolution::Found(q) => Some(q),
            PriceResolution::NotFound(_) => None,
        }
    }

    /// Catalog problems met while resolving, on either outcome.
    pub fn integrity(&self) -> &[IntegrityIssue] {
        match self {
            PriceResolution::Found(q) => &q.integrity,
            PriceResolution::NotFound(Miss::NoPriceForFrequency { integrity, .. }) => integrity,
            PriceResolution::NotFound(_) => &[],
        }
    }

    fn outcome_label(&self) -> &'static str {
        match self {
            PriceResolution::Found(_) => "found",
            PriceResolution::NotFound(Miss::Invalid(_)) => "invalid",
            PriceResolution::NotFound(_) => "not_found",
        }
    }
}

/// Why no price came back. `Invalid` is bad input; the other two are
/// legitimate "nothing priced here" answers.
#[derive(Debug, Clone, PartialEq)]
pub enum Miss {
    NoTierForArea { area: f64 },
    NoPriceForFrequency {
        tier: usize,
        frequency: u32,
        /// Overlaps met on the way. A shadowed tier may have priced this query.
        integrity: Vec<IntegrityIssue>,
    },
    Invalid(ValidationError),
}

impl fmt::Display for Miss {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Miss::NoTierForArea { area } => write!(f, "no pricing tier covers {area} sqm"),
            Miss::NoPriceForFrequency { tier, frequency, .. } => {
                write!(f, "tier {tier} has no price for {frequency} visits per cycle")
            }
            Miss::Invalid(e) => write!(f, "invalid query: {e}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ValidationError {
    NonPositiveArea(f64),
    NonPositiveFrequency(i64),
    UnknownPackage(Ulid),
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::NonPositiveArea(a) => write!(f, "area must be positive, got {a}"),
            ValidationError::NonPositiveFrequency(n) => {
                write!(f, "frequency must be positive, got {n}")
            }
            ValidationError::UnknownPackage(id) => write!(f, "unknown package: {id}"),
        }
    }
}

impl std::error::Error for ValidationError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntegrityIssue {
    OverlappingTiers { first: usize, second: usize },
    DuplicateFrequency { tier: usize, frequency: u32 },
    InvertedRange { tier: usize },
}

impl fmt::Display for IntegrityIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IntegrityIssue::OverlappingTiers { first, second } => {
                write!(f, "tiers {first} and {second} have overlapping area ranges")
            }
            IntegrityIssue::DuplicateFrequency { tier, frequency } => {
                write!(f, "tier {tier} lists frequency {frequency} more than once")
            }
            IntegrityIssue::InvertedRange { tier } => {
                write!(f, "tier {tier} has area_min greater than area_max")
            }
        }
    }
}

/// Price a query against one package.
///
/// Fixed packages ignore area and frequency entirely. Tiered packages pick
/// the first tier (catalog order) whose inclusive range holds the area, then
/// look the frequency up by exact match in that tier only.
pub fn resolve(query: &PriceQuery, package: &ServicePackage) -> PriceResolution {
    let resolution = match &package.model {
        PricingModel::Fixed {
            base_price,
            duration_minutes,
        } => PriceResolution::Found(PriceQuote {
            price: *base_price,
            required_staff: 1,
            estimated_hours: duration_minutes.map(|m| f64::from(m) / 60.0),
            tier: None,
            integrity: Vec::new(),
        }),
        PricingModel::Tiered { tiers } => resolve_tiered(query, tiers),
    };

    let issues = resolution.integrity();
    if !issues.is_empty() {
        metrics::counter!(observability::PRICING_INTEGRITY_VIOLATIONS_TOTAL)
            .increment(issues.len() as u64);
        for issue in issues {
            warn!(package = %package.id, "pricing data integrity: {issue}");
        }
    }
    metrics::counter!(observability::PRICE_RESOLUTIONS_TOTAL, "outcome" => resolution.outcome_label())
        .increment(1);
    resolution
}

/// Find the query's package in a fetched catalog and resolve against it.
pub fn resolve_in_catalog(query: &PriceQuery, catalog: &[ServicePackage]) -> PriceResolution {
    match catalog.iter().find(|p| p.id == query.package_id) {
        Some(package) => resolve(query, package),
        None => {
            metrics::counter!(observability::PRICE_RESOLUTIONS_TOTAL, "outcome" => "invalid")
                .increment(1);
            PriceResolution::NotFound(Miss::Invalid(ValidationError::UnknownPackage(
                query.package_id,
            )))
        }
    }
}

fn resolve_tiered(query: &PriceQuery, tiers: &[PricingTier]) -> PriceResolution {
    let frequency = match query.validate() {
        Ok(f) => f,
        Err(e) => return PriceResolution::NotFound(Miss::Invalid(e)),
    };

    let mut covering = tiers
        .iter()
        .enumerate()
        .filter(|(_, t)| t.covers(query.area));

    // First match in catalog order wins. Any further covering tier is
    // shadowed and reported, never consulted.
    let Some((index, tier)) = covering.next() else {
        return PriceResolution::NotFound(Miss::NoTierForArea { area: query.area });
    };
    let mut integrity: Vec<IntegrityIssue> = covering
        .map(|(second, _)| IntegrityIssue::OverlappingTiers {
            first: index,
            second,
        })
        .collect();

    let Some(price) = tier.price_for(frequency) else {
        return PriceResolution::NotFound(Miss::NoPriceForFrequency {
            tier: index,
            frequency,
            integrity,
        });
    };
    if tier.prices.iter().filter(|p| p.frequency == frequency).count() > 1 {
        integrity.push(IntegrityIssue::DuplicateFrequency {
            tier: index,
            frequency,
        });
    }

    PriceResolution::Found(PriceQuote {
        price,
        required_staff: tier.required_staff,
        estimated_hours: tier.estimated_hours,
        tier: Some(index),
        integrity,
    })
}

/// Full integrity scan of a package, for use when a catalog is authored or
/// imported. Resolution itself only reports what it trips over.
pub fn check_package(package: &ServicePackage) -> Vec<IntegrityIssue> {
    let PricingModel::Tiered { tiers } = &package.model else {
        return Vec::new();
    };
    let mut issues = Vec::new();
    for (i, tier) in tiers.iter().enumerate() {
        if tier.area_min > tier.area_max {
            issues.push(IntegrityIssue::InvertedRange { tier: i });
        }
        for (j, other) in tiers.iter().enumerate().skip(i + 1) {
            if tier.overlaps(other) {
                issues.push(IntegrityIssue::OverlappingTiers {
                    first: i,
                    second: j,
                });
            }
        }
        let mut seen: Vec<u32> = Vec::with_capacity(tier.prices.len());
        for p in &tier.prices {
            if seen.contains(&p.frequency) {
                let issue = IntegrityIssue::DuplicateFrequency {
                    tier: i,
                    frequency: p.frequency,
                };
                if !issues.contains(&issue) {
                    issues.push(issue);
                }
            } else {
                seen.push(p.frequency);
            }
        }
    }
    issues
}
