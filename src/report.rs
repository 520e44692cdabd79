use std::collections::HashMap;
use std::fmt::Write;

use chrono::NaiveDate;

use crate::models::{DatePartition, StatsDataObject, StatsType};

pub fn count_by_type(stats: &[StatsDataObject]) -> Vec<(StatsType, usize)> {
    let mut counts: HashMap<StatsType, usize> = HashMap::new();
    let mut order = Vec::new();

    for entry in stats {
        let count = counts.entry(entry.stats_type).or_insert_with(|| {
            order.push(entry.stats_type);
            0
        });
        *count += 1;
    }

    order
        .into_iter()
        .map(|stats_type| (stats_type, counts[&stats_type]))
        .collect()
}

pub fn build_preview(date: NaiveDate, stats: &[StatsDataObject]) -> String {
    let partition = DatePartition::from_date(date);
    let mut output = String::new();

    let _ = writeln!(output, "# Stats Collection Preview");
    let _ = writeln!(
        output,
        "Collected for {} (day {}, week {}, month {}, year {})",
        date, partition.day, partition.week, partition.month, partition.year
    );
    let _ = writeln!(output);
    let _ = writeln!(output, "## Entries by Type");

    if stats.is_empty() {
        let _ = writeln!(output, "No stats to send for the selected records.");
        return output;
    }

    for (stats_type, count) in count_by_type(stats) {
        let _ = writeln!(output, "- {stats_type}: {count} entries");
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Records");

    for entry in stats {
        let _ = writeln!(
            output,
            "- {} [{}] ({})",
            entry.data.category, entry.stats_type, entry.anr
        );
        if entry.data.series.is_empty() {
            let _ = writeln!(output, "  - no data");
        }
        for point in &entry.data.series {
            let _ = writeln!(output, "  - {}: {}", point.label, point.value);
        }
    }

    output
}
