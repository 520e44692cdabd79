use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Anr {
    pub id: i32,
    pub uuid: Uuid,
    pub label: String,
    pub seuil1: i32,
    pub seuil2: i32,
}

/// One evaluated information risk of an analysis record.
#[derive(Debug, Clone)]
pub struct RiskRow {
    pub threat_label: String,
    pub vulnerability_label: String,
    pub max_risk: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatsType {
    Risk,
    Threat,
    Vulnerability,
}

impl StatsType {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatsType::Risk => "risk",
            StatsType::Threat => "threat",
            StatsType::Vulnerability => "vulnerability",
        }
    }
}

impl fmt::Display for StatsType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StatsType {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "risk" => Ok(StatsType::Risk),
            "threat" => Ok(StatsType::Threat),
            "vulnerability" => Ok(StatsType::Vulnerability),
            other => Err(format!("unknown stats type `{other}`")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeriesPoint {
    pub label: String,
    pub value: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsData {
    pub category: String,
    pub series: Vec<SeriesPoint>,
}

/// Calendar keys stamped on every data point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DatePartition {
    pub day: u32,
    pub week: u32,
    pub month: u32,
    pub year: i32,
}

impl DatePartition {
    pub fn from_date(date: NaiveDate) -> Self {
        Self {
            day: date.ordinal(),
            week: date.iso_week().week(),
            month: date.month(),
            year: date.year(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsDataObject {
    #[serde(rename = "type")]
    pub stats_type: StatsType,
    pub anr: Uuid,
    pub data: StatsData,
    pub day: u32,
    pub week: u32,
    pub month: u32,
    pub year: i32,
}

impl StatsDataObject {
    pub fn new(stats_type: StatsType, anr: Uuid, data: StatsData, partition: DatePartition) -> Self {
        Self {
            stats_type,
            anr,
            data,
            day: partition.day,
            week: partition.week,
            month: partition.month,
            year: partition.year,
        }
    }
}
