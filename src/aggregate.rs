use std::collections::HashMap;

use crate::models::{Anr, DatePartition, RiskRow, SeriesPoint, StatsData, StatsDataObject, StatsType};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    pub fn label(&self) -> &'static str {
        match self {
            RiskLevel::Low => "Low risks",
            RiskLevel::Medium => "Medium risks",
            RiskLevel::High => "High risks",
        }
    }
}

/// Buckets a risk score against the record thresholds. Negative scores are
/// not evaluated yet and have no level.
pub fn risk_level(score: i32, seuil1: i32, seuil2: i32) -> Option<RiskLevel> {
    if score < 0 {
        None
    } else if score <= seuil1 {
        Some(RiskLevel::Low)
    } else if score <= seuil2 {
        Some(RiskLevel::Medium)
    } else {
        Some(RiskLevel::High)
    }
}

pub fn risk_stats(anr: &Anr, rows: &[RiskRow]) -> StatsData {
    let (mut low, mut medium, mut high) = (0i64, 0i64, 0i64);

    for row in rows {
        match risk_level(row.max_risk, anr.seuil1, anr.seuil2) {
            Some(RiskLevel::Low) => low += 1,
            Some(RiskLevel::Medium) => medium += 1,
            Some(RiskLevel::High) => high += 1,
            None => {}
        }
    }

    StatsData {
        category: anr.label.clone(),
        series: [
            (RiskLevel::Low, low),
            (RiskLevel::Medium, medium),
            (RiskLevel::High, high),
        ]
        .into_iter()
        .map(|(level, value)| SeriesPoint {
            label: level.label().to_string(),
            value,
        })
        .collect(),
    }
}

/// Counts label occurrences, most frequent first, ties broken by label.
pub fn top_labels<'a, I>(labels: I, limit: usize) -> Vec<SeriesPoint>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut counts: HashMap<&str, i64> = HashMap::new();
    for label in labels {
        *counts.entry(label).or_insert(0) += 1;
    }

    let mut points: Vec<SeriesPoint> = counts
        .into_iter()
        .map(|(label, value)| SeriesPoint {
            label: label.to_string(),
            value,
        })
        .collect();
    points.sort_by(|a, b| b.value.cmp(&a.value).then_with(|| a.label.cmp(&b.label)));
    points.truncate(limit);
    points
}

/// Builds the data points of one record, in the order of `types`.
pub fn build_entries(
    anr: &Anr,
    rows: &[RiskRow],
    types: &[StatsType],
    partition: DatePartition,
    series_limit: usize,
) -> Vec<StatsDataObject> {
    let evaluated: Vec<&RiskRow> = rows.iter().filter(|row| row.max_risk >= 0).collect();
    let mut entries = Vec::with_capacity(types.len());

    for stats_type in types {
        let data = match stats_type {
            StatsType::Risk => risk_stats(anr, rows),
            StatsType::Threat | StatsType::Vulnerability => {
                if evaluated.is_empty() {
                    continue;
                }
                let labels = evaluated.iter().map(|row| match stats_type {
                    StatsType::Threat => row.threat_label.as_str(),
                    _ => row.vulnerability_label.as_str(),
                });
                StatsData {
                    category: anr.label.clone(),
                    series: top_labels(labels, series_limit),
                }
            }
        };

        entries.push(StatsDataObject::new(*stats_type, anr.uuid, data, partition));
    }

    entries
}
