use std::path::Path;

use chrono::Local;
use colored::Colorize;
use eyre::Result;
use log::{info, warn};

use crate::models::job::JobRecord;
use crate::storage::records::RecordStore;

const SAMPLE_COUNT: usize = 5;

#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub title: String,
    pub chars: usize,
}

/// How far an output file has been enriched relative to its input.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressReport {
    pub total: usize,
    pub with_description: usize,
    pub with_posted_date: usize,
    pub with_salary: usize,
    pub samples: Vec<Sample>,
    /// (min, average, max) description length in chars
    pub lengths: Option<(usize, usize, usize)>,
}

impl ProgressReport {
    pub fn from_records(total: usize, records: &[JobRecord]) -> Self {
        let enriched: Vec<_> = records.iter().filter_map(|r| Some((r, r.description()?))).collect();

        let lengths: Vec<usize> = enriched.iter().map(|(_, d)| d.chars().count()).collect();
        let lengths = match (lengths.iter().min(), lengths.iter().max()) {
            (Some(&min), Some(&max)) => Some((min, lengths.iter().sum::<usize>() / lengths.len(), max)),
            _ => None,
        };

        Self {
            total: total.max(records.len()),
            with_description: enriched.len(),
            with_posted_date: records
                .iter()
                .filter(|r| r.posted_date.as_deref().is_some_and(|d| !d.trim().is_empty()))
                .count(),
            with_salary: records
                .iter()
                .filter(|r| r.salary.as_deref().is_some_and(|s| !s.trim().is_empty()))
                .count(),
            samples: enriched
                .iter()
                .take(SAMPLE_COUNT)
                .map(|(r, d)| Sample {
                    title: r.title.clone(),
                    chars: d.chars().count(),
                })
                .collect(),
            lengths,
        }
    }

    /// Builds the report the same way an enrichment run would see the data:
    /// the output as checkpoint with the input merged on top.
    pub fn from_paths(input: &Path, output: &Path) -> Result<Self> {
        let store = if output.exists() {
            RecordStore::open(input, output)?
        } else {
            warn!("{} not found yet, nothing has been enriched", output.display());
            RecordStore::load(input)?
        };
        info!("read {} records", store.len());

        Ok(Self::from_records(store.len(), store.records()))
    }

    pub fn remaining(&self) -> usize {
        self.total - self.with_description
    }

    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.with_description as f64 * 100.0 / self.total as f64
        }
    }

    pub fn print(&self) {
        let rule = "=".repeat(70);
        println!("{}", rule.cyan());
        println!(
            "{} {}",
            "Description enrichment progress".cyan().bold(),
            Local::now().format("%H:%M:%S").to_string().dimmed()
        );
        println!("{}", rule.cyan());
        println!("Total jobs:              {}", self.total);
        println!(
            "Jobs with descriptions:  {} ({:.1}%)",
            self.with_description.to_string().green(),
            self.percent()
        );
        println!("Jobs with posting date:  {}", self.with_posted_date);
        println!("Jobs with salary:        {}", self.with_salary);
        println!("Remaining:               {}", self.remaining().to_string().yellow());

        if let Some((min, avg, max)) = self.lengths {
            println!("Description length:      min {min}, avg {avg}, max {max} chars");
        }
        println!("{}", rule.cyan());

        if !self.samples.is_empty() {
            println!("\n{}", "Sample jobs with descriptions:".cyan());
            for sample in &self.samples {
                let title: String = sample.title.chars().take(50).collect();
                println!("  • {:<50} ({} chars)", title.bold(), sample.chars);
            }
        }
        println!();
    }
}
