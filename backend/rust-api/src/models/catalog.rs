use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;

use super::QuizLevel;

/// One immutable trivia question scoped to a (team, level) pair.
/// Matches the flat `questions.json` entry shape used at content-authoring
/// time; the engine treats the text as opaque, already-materialized data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionCatalogEntry {
    pub id: String,
    pub team: String,
    pub level: QuizLevel,
    pub question: String,
    pub options: Vec<String>,
    #[serde(rename = "correctAnswerIndex")]
    pub correct_answer_index: usize,
    #[serde(default)]
    pub explanation: String,
}

impl QuestionCatalogEntry {
    pub fn correct_answer(&self) -> &str {
        &self.options[self.correct_answer_index]
    }
}

/// Which difficulty levels a team has at least one question for.
#[derive(Debug, Clone, Serialize)]
pub struct TeamAvailability {
    pub name: String,
    pub has_easy: bool,
    pub has_medium: bool,
    pub has_hard: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("failed to read question catalog: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse question catalog: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("duplicate question id '{0}' in catalog")]
    DuplicateId(String),
    #[error("question '{id}' must have exactly {expected} options (has {actual})")]
    BadOptionCount {
        id: String,
        expected: usize,
        actual: usize,
    },
    #[error("question '{id}' correct answer index {index} is out of range")]
    BadAnswerIndex { id: String, index: usize },
}

const OPTIONS_PER_QUESTION: usize = 4;

/// The read-only question bank. Built once at startup and shared behind an
/// Arc; nothing mutates it at runtime, so lookups need no locking.
#[derive(Debug)]
pub struct QuestionCatalog {
    version: String,
    entries: Vec<QuestionCatalogEntry>,
    by_id: HashMap<String, usize>,
    by_team_level: HashMap<(String, QuizLevel), Vec<usize>>,
}

impl QuestionCatalog {
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, CatalogError> {
        let raw = std::fs::read(path.as_ref())?;
        let entries: Vec<QuestionCatalogEntry> = serde_json::from_slice(&raw)?;
        // Version the load so operators can tell which bank is live.
        let version = format!("file:{}:{}", path.as_ref().display(), entries.len());
        Self::build(version, entries)
    }

    pub fn build(
        version: String,
        entries: Vec<QuestionCatalogEntry>,
    ) -> Result<Self, CatalogError> {
        let mut by_id = HashMap::with_capacity(entries.len());
        let mut by_team_level: HashMap<(String, QuizLevel), Vec<usize>> = HashMap::new();

        for (idx, entry) in entries.iter().enumerate() {
            if entry.options.len() != OPTIONS_PER_QUESTION {
                return Err(CatalogError::BadOptionCount {
                    id: entry.id.clone(),
                    expected: OPTIONS_PER_QUESTION,
                    actual: entry.options.len(),
                });
            }
            if entry.correct_answer_index >= entry.options.len() {
                return Err(CatalogError::BadAnswerIndex {
                    id: entry.id.clone(),
                    index: entry.correct_answer_index,
                });
            }
            if by_id.insert(entry.id.clone(), idx).is_some() {
                return Err(CatalogError::DuplicateId(entry.id.clone()));
            }
            by_team_level
                .entry((entry.team.clone(), entry.level))
                .or_default()
                .push(idx);
        }

        Ok(Self {
            version,
            entries,
            by_id,
            by_team_level,
        })
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&QuestionCatalogEntry> {
        self.by_id.get(id).map(|&idx| &self.entries[idx])
    }

    pub fn has_team(&self, team: &str) -> bool {
        QuizLevel::ALL
            .iter()
            .any(|&level| self.count_for(team, level) > 0)
    }

    /// Number of catalog entries for a (team, level) pair.
    pub fn count_for(&self, team: &str, level: QuizLevel) -> usize {
        self.by_team_level
            .get(&(team.to_string(), level))
            .map(|ids| ids.len())
            .unwrap_or(0)
    }

    /// Entries for (team, level) whose ids are not in `asked`, in catalog
    /// order. Pool exhaustion for the caller is exactly: this is empty while
    /// `count_for` is non-zero.
    pub fn unseen_for(
        &self,
        team: &str,
        level: QuizLevel,
        asked: &HashSet<String>,
    ) -> Vec<&QuestionCatalogEntry> {
        self.by_team_level
            .get(&(team.to_string(), level))
            .map(|indices| {
                indices
                    .iter()
                    .map(|&idx| &self.entries[idx])
                    .filter(|entry| !asked.contains(&entry.id))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Team list for the level-selection UI, sorted by name.
    pub fn teams_available(&self) -> Vec<TeamAvailability> {
        let mut teams: BTreeMap<&str, TeamAvailability> = BTreeMap::new();
        for entry in &self.entries {
            let availability =
                teams
                    .entry(entry.team.as_str())
                    .or_insert_with(|| TeamAvailability {
                        name: entry.team.clone(),
                        has_easy: false,
                        has_medium: false,
                        has_hard: false,
                    });
            match entry.level {
                QuizLevel::Easy => availability.has_easy = true,
                QuizLevel::Medium => availability.has_medium = true,
                QuizLevel::Hard => availability.has_hard = true,
            }
        }
        teams.into_values().collect()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn entry(id: &str, team: &str, level: QuizLevel) -> QuestionCatalogEntry {
        QuestionCatalogEntry {
            id: id.to_string(),
            team: team.to_string(),
            level,
            question: format!("Question {id}?"),
            options: vec![
                "Alpha".to_string(),
                "Bravo".to_string(),
                "Charlie".to_string(),
                "Delta".to_string(),
            ],
            correct_answer_index: 1,
            explanation: format!("Because {id}."),
        }
    }

    pub(crate) fn fixture_catalog() -> QuestionCatalog {
        QuestionCatalog::build(
            "test:fixture".to_string(),
            vec![
                entry("ars-e1", "Arsenal", QuizLevel::Easy),
                entry("ars-e2", "Arsenal", QuizLevel::Easy),
                entry("ars-e3", "Arsenal", QuizLevel::Easy),
                entry("ars-m1", "Arsenal", QuizLevel::Medium),
                entry("lak-h1", "Los Angeles Lakers", QuizLevel::Hard),
            ],
        )
        .unwrap()
    }

    #[test]
    fn parses_authoring_json_shape() {
        let json = r#"[{
            "id": "ars-001",
            "team": "Arsenal",
            "level": "Easy",
            "question": "In which year was Arsenal founded?",
            "options": ["1886", "1892", "1901", "1910"],
            "correctAnswerIndex": 0,
            "explanation": "Arsenal was founded in 1886 as Dial Square."
        }]"#;
        let entries: Vec<QuestionCatalogEntry> = serde_json::from_str(json).unwrap();
        let catalog = QuestionCatalog::build("test:json".into(), entries).unwrap();
        assert_eq!(catalog.len(), 1);
        assert_eq!(catalog.get("ars-001").unwrap().correct_answer(), "1886");
    }

    #[test]
    fn rejects_duplicate_ids_and_bad_shapes() {
        let dup = QuestionCatalog::build(
            "t".into(),
            vec![
                entry("q1", "Arsenal", QuizLevel::Easy),
                entry("q1", "Arsenal", QuizLevel::Easy),
            ],
        );
        assert!(matches!(dup, Err(CatalogError::DuplicateId(_))));

        let mut three_options = entry("q2", "Arsenal", QuizLevel::Easy);
        three_options.options.pop();
        assert!(matches!(
            QuestionCatalog::build("t".into(), vec![three_options]),
            Err(CatalogError::BadOptionCount { .. })
        ));

        let mut bad_index = entry("q3", "Arsenal", QuizLevel::Easy);
        bad_index.correct_answer_index = 9;
        assert!(matches!(
            QuestionCatalog::build("t".into(), vec![bad_index]),
            Err(CatalogError::BadAnswerIndex { .. })
        ));
    }

    #[test]
    fn availability_reflects_levels_present() {
        let catalog = fixture_catalog();
        let teams = catalog.teams_available();
        assert_eq!(teams.len(), 2);
        // Sorted by name
        assert_eq!(teams[0].name, "Arsenal");
        assert!(teams[0].has_easy && teams[0].has_medium && !teams[0].has_hard);
        assert_eq!(teams[1].name, "Los Angeles Lakers");
        assert!(!teams[1].has_easy && !teams[1].has_medium && teams[1].has_hard);
    }

    #[test]
    fn unseen_excludes_asked_ids() {
        let catalog = fixture_catalog();
        let mut asked = HashSet::new();
        asked.insert("ars-e1".to_string());

        let unseen = catalog.unseen_for("Arsenal", QuizLevel::Easy, &asked);
        let ids: Vec<&str> = unseen.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["ars-e2", "ars-e3"]);
    }

    #[test]
    fn unseen_is_empty_exactly_at_exhaustion() {
        let catalog = fixture_catalog();
        let asked: HashSet<String> = ["ars-e1", "ars-e2", "ars-e3"]
            .iter()
            .map(|s| s.to_string())
            .collect();

        assert!(catalog.unseen_for("Arsenal", QuizLevel::Easy, &asked).is_empty());
        assert_eq!(catalog.count_for("Arsenal", QuizLevel::Easy), 3);
        // Unknown team: empty unseen but also an empty catalog, not exhaustion.
        assert!(catalog
            .unseen_for("Chelsea", QuizLevel::Easy, &HashSet::new())
            .is_empty());
        assert_eq!(catalog.count_for("Chelsea", QuizLevel::Easy), 0);
    }
}
