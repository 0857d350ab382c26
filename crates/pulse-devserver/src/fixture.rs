//! Seed data for the development server.

use anyhow::{Context, Result};
use pulse_core::{Block, DatasetSummary, Selection};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Initial contents of the in-memory service.
///
/// ```yaml
/// datasets:
///   - id: wave-2024
///     filename: wave-2024.sav
/// blocks:
///   - dataset_id: wave-2024
///     question_id: Q1
///     question_text: How satisfied are you?
///     responses:
///       - { label: Very, value: "41%" }
/// selections:
///   - { user_id: dev@local, dataset_id: wave-2024, question_id: Q1 }
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Fixture {
    pub datasets: Vec<DatasetSummary>,
    pub blocks: Vec<Block>,
    pub selections: Vec<Selection>,
}

impl Fixture {
    /// Read a fixture from a YAML or JSON file.
    ///
    /// # Errors
    /// Returns error if the file cannot be read or parsed.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read fixture {}", path.display()))?;
        serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse fixture {}", path.display()))
    }

    /// `count` generated blocks (`q0001..`) in `dataset_id`.
    #[must_use]
    pub fn with_generated_blocks(mut self, dataset_id: &str, count: usize) -> Self {
        self.datasets.push(DatasetSummary::new(dataset_id));
        for i in 1..=count {
            self.blocks.push(
                Block::new(dataset_id, format!("q{i:04}"), format!("Generated question {i}"))
                    .with_response("Yes", format!("{}%", 100 - i % 100))
                    .with_response("No", format!("{}%", i % 100)),
            );
        }
        self
    }

    #[must_use]
    pub fn with_selection(mut self, user_id: &str, dataset_id: &str, question_id: &str) -> Self {
        self.selections
            .push(Selection::new(user_id, dataset_id, question_id));
        self
    }

    /// Small two-dataset workspace for `pulse dev-server` without a fixture file.
    #[must_use]
    pub fn demo() -> Self {
        let wave1 = "wave-2024-spring";
        let wave2 = "wave-2024-autumn";

        let mut fixture = Self::default();
        for (id, filename) in [(wave1, "spring.sav"), (wave2, "autumn.sav")] {
            let mut dataset = DatasetSummary::new(id);
            dataset
                .extra
                .insert("filename".to_string(), serde_json::Value::from(filename));
            fixture.datasets.push(dataset);
        }

        for dataset_id in [wave1, wave2] {
            fixture.blocks.extend([
                Block::new(dataset_id, "Q1", "How satisfied are you with your commute?")
                    .with_metadata("organization", "Transit Board")
                    .with_response("Very satisfied", "18%")
                    .with_response("Somewhat satisfied", "44%")
                    .with_response("Not satisfied", "38%"),
                Block::new(dataset_id, "Q2", "How many days a week do you work remotely?")
                    .with_response("0", "35%")
                    .with_response("1-2", "40%")
                    .with_response("3+", "25%"),
                Block::new(dataset_id, "Q3", "Would you recommend your employer?")
                    .with_response("Yes", "61%")
                    .with_response("No", "39%"),
            ]);
        }

        fixture
            .with_selection("dev@local", wave1, "Q1")
            .with_selection("dev@local", wave1, "Q3")
            .with_selection("dev@local", wave2, "Q2")
    }
}
