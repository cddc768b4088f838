//! Contact table and fuzzy name resolution.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use super::similarity;

pub const HEADER: [&str; 2] = ["Name", "Email"];

/// Minimum similarity a fuzzy match must exceed.
pub const MATCH_THRESHOLD: f64 = 0.6;

/// Identifies the backing table once it has been located or created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SheetHandle(pub String);

/// One contact row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContactRecord {
    pub display_name: String,
    pub email: String,
}

/// Storage behind the contact table: a two-column table with a header row.
#[async_trait]
pub trait ContactStore: Send + Sync {
    /// Find an existing table.
    async fn locate(&self) -> anyhow::Result<Option<SheetHandle>>;
    /// Create the table with its header row. Must tolerate the table
    /// already existing.
    async fn create(&self) -> anyhow::Result<SheetHandle>;
    async fn read_rows(&self, sheet: &SheetHandle) -> anyhow::Result<Vec<Vec<String>>>;
    async fn append_row(&self, sheet: &SheetHandle, row: Vec<String>) -> anyhow::Result<()>;
}

// ---------------------------------------------------------------------------
// FileContactStore
// ---------------------------------------------------------------------------

/// Contact table stored as a JSON array of rows.
#[derive(Debug, Clone)]
pub struct FileContactStore {
    path: PathBuf,
}

impl FileContactStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn write_rows(&self, rows: &[Vec<String>]) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_string_pretty(rows)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json)
            .await
            .with_context(|| format!("writing {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl ContactStore for FileContactStore {
    async fn locate(&self) -> anyhow::Result<Option<SheetHandle>> {
        match tokio::fs::metadata(&self.path).await {
            Ok(meta) if meta.is_file() => Ok(Some(SheetHandle(self.path.display().to_string()))),
            Ok(_) => anyhow::bail!("{} is not a file", self.path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("checking {}", self.path.display())),
        }
    }

    async fn create(&self) -> anyhow::Result<SheetHandle> {
        if let Some(handle) = self.locate().await? {
            return Ok(handle);
        }
        info!(path = %self.path.display(), "creating contact table");
        self.write_rows(&[HEADER.iter().map(|s| s.to_string()).collect()])
            .await?;
        Ok(SheetHandle(self.path.display().to_string()))
    }

    async fn read_rows(&self, _sheet: &SheetHandle) -> anyhow::Result<Vec<Vec<String>>> {
        let content = tokio::fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("reading {}", self.path.display()))?;
        if content.trim().is_empty() {
            return Ok(Vec::new());
        }
        let rows: Vec<Vec<serde_json::Value>> = serde_json::from_str(&content)
            .with_context(|| format!("parsing {}", self.path.display()))?;
        // Cells may be numbers or null in hand-edited tables.
        Ok(rows
            .into_iter()
            .map(|row| {
                row.into_iter()
                    .map(|cell| match cell {
                        serde_json::Value::String(s) => s,
                        serde_json::Value::Null => String::new(),
                        other => other.to_string(),
                    })
                    .collect()
            })
            .collect())
    }

    async fn append_row(&self, sheet: &SheetHandle, row: Vec<String>) -> anyhow::Result<()> {
        let mut rows = self.read_rows(sheet).await?;
        if rows.is_empty() {
            rows.push(HEADER.iter().map(|s| s.to_string()).collect());
        }
        rows.push(row);
        self.write_rows(&rows).await
    }
}

// ---------------------------------------------------------------------------
// ContactResolver
// ---------------------------------------------------------------------------

/// Outcome of a lookup. Every variant has a text form for the wire.
#[derive(Debug, Clone, PartialEq)]
pub enum ContactLookup {
    Found(String),
    NotFound,
    /// The table holds no data rows.
    Empty,
    /// The table could not be reached.
    Unreachable(String),
}

impl fmt::Display for ContactLookup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContactLookup::Found(email) => f.write_str(email),
            ContactLookup::NotFound => f.write_str("not found"),
            ContactLookup::Empty => f.write_str("contact table empty"),
            ContactLookup::Unreachable(cause) => {
                write!(f, "error: contact table unreachable: {cause}")
            }
        }
    }
}

/// Name-to-email lookup over a [`ContactStore`].
///
/// The table handle is resolved once per process and reused. A failed
/// resolution is not cached, so the next lookup tries again.
pub struct ContactResolver {
    store: Arc<dyn ContactStore>,
    sheet: OnceCell<SheetHandle>,
}

impl ContactResolver {
    pub fn new(store: Arc<dyn ContactStore>) -> Self {
        Self {
            store,
            sheet: OnceCell::new(),
        }
    }

    /// Locate the table, creating it if absent.
    pub async fn sheet(&self) -> anyhow::Result<&SheetHandle> {
        self.sheet
            .get_or_try_init(|| async {
                match self.store.locate().await {
                    Ok(Some(handle)) => {
                        debug!(sheet = %handle.0, "contact table found");
                        return Ok(handle);
                    }
                    Ok(None) => {}
                    Err(e) => warn!(error = %e, "contact table lookup failed, trying to create it"),
                }
                self.store.create().await
            })
            .await
    }

    /// All data rows, header excluded.
    pub async fn list(&self) -> anyhow::Result<Vec<ContactRecord>> {
        let sheet = self.sheet().await?;
        let rows = self.store.read_rows(sheet).await?;
        Ok(records(&rows).collect())
    }

    pub async fn add_contact(&self, name: &str, email: &str) -> anyhow::Result<()> {
        let (name, email) = (name.trim(), email.trim());
        if name.is_empty() || !email.contains('@') {
            anyhow::bail!("a contact needs a name and an email address");
        }
        let sheet = self.sheet().await?;
        self.store
            .append_row(sheet, vec![name.to_string(), email.to_string()])
            .await?;
        info!(name, email, "contact added");
        Ok(())
    }

    /// Resolve `query` to an email address.
    ///
    /// Substring containment over the whole table wins first (table order
    /// breaks ties); otherwise the best similarity above
    /// [`MATCH_THRESHOLD`] is taken, first seen on ties.
    pub async fn find(&self, query: &str) -> ContactLookup {
        let rows = match self.sheet().await {
            Ok(sheet) => match self.store.read_rows(sheet).await {
                Ok(rows) => rows,
                Err(e) => {
                    warn!(error = %e, "contact table read failed");
                    return ContactLookup::Unreachable(e.to_string());
                }
            },
            Err(e) => {
                warn!(error = %e, "contact table unavailable");
                return ContactLookup::Unreachable(e.to_string());
            }
        };
        let lookup = match_rows(query, &rows);
        debug!(query, result = %lookup, "contact lookup");
        lookup
    }
}

fn records(rows: &[Vec<String>]) -> impl Iterator<Item = ContactRecord> + '_ {
    rows.iter().skip(1).filter(|r| r.len() >= 2).map(|r| ContactRecord {
        display_name: r[0].trim().to_string(),
        email: r[1].trim().to_string(),
    })
}

/// The matching algorithm over raw table rows (header first).
pub fn match_rows(query: &str, rows: &[Vec<String>]) -> ContactLookup {
    if rows.len() < 2 {
        return ContactLookup::Empty;
    }
    let target = query.trim().to_lowercase();
    let candidates: Vec<(String, String)> = records(rows)
        .map(|r| (r.display_name.to_lowercase(), r.email))
        .collect();

    if let Some((_, email)) = candidates.iter().find(|(name, _)| name.contains(&target)) {
        return ContactLookup::Found(email.clone());
    }

    let mut best: Option<(&str, f64)> = None;
    for (name, email) in &candidates {
        let score = similarity::ratio(&target, name);
        if score > MATCH_THRESHOLD && best.map_or(true, |(_, s)| score > s) {
            best = Some((email.as_str(), score));
        }
    }
    match best {
        Some((email, _)) => ContactLookup::Found(email.to_string()),
        None => ContactLookup::NotFound,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(rows: &[(&str, &str)]) -> Vec<Vec<String>> {
        std::iter::once(("Name", "Email"))
            .chain(rows.iter().copied())
            .map(|(n, e)| vec![n.to_string(), e.to_string()])
            .collect()
    }

    #[test]
    fn containment_beats_a_better_fuzzy_score_later() {
        let rows = table(&[("Ali Veli", "ali@x.com"), ("Alı", "ali2@x.com")]);
        assert_eq!(match_rows("ali", &rows), ContactLookup::Found("ali@x.com".into()));
    }

    #[test]
    fn fuzzy_match_above_threshold() {
        let rows = table(&[("Mehmet Yilmaz", "m@x.com"), ("Ayse", "ayse@x.com")]);
        // "ayşe" vs "ayse" = 0.75
        assert_eq!(match_rows("Ayşe", &rows), ContactLookup::Found("ayse@x.com".into()));
    }

    #[test]
    fn short_rows_are_skipped() {
        let rows = vec![
            vec!["Name".into(), "Email".into()],
            vec!["Lonely".into()],
            vec!["Engin Vardar".into(), " engin@x.com ".into()],
        ];
        assert_eq!(match_rows("engin", &rows), ContactLookup::Found("engin@x.com".into()));
    }

    #[test]
    fn header_only_is_empty() {
        assert_eq!(match_rows("x", &table(&[])), ContactLookup::Empty);
        assert_eq!(match_rows("x", &[]), ContactLookup::Empty);
    }

    #[test]
    fn wire_text() {
        assert_eq!(ContactLookup::NotFound.to_string(), "not found");
        assert_eq!(ContactLookup::Empty.to_string(), "contact table empty");
        assert_eq!(
            ContactLookup::Unreachable("denied".into()).to_string(),
            "error: contact table unreachable: denied"
        );
    }
}
