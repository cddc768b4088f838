//! Contact resolution against file-backed and failing stores.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use specter::services::contacts::{
    ContactLookup, ContactResolver, ContactStore, FileContactStore, SheetHandle,
};

fn write_table(path: &std::path::Path, rows: &[(&str, &str)]) {
    let mut table = vec![vec!["Name".to_string(), "Email".to_string()]];
    table.extend(rows.iter().map(|(n, e)| vec![n.to_string(), e.to_string()]));
    std::fs::write(path, serde_json::to_string(&table).unwrap()).unwrap();
}

fn ten_people() -> Vec<(&'static str, &'static str)> {
    vec![
        ("Mehmet Yılmaz", "mehmet@x.com"),
        ("Zeynep Kaya", "zeynep@x.com"),
        ("Ahmet Demir", "ahmet@x.com"),
        ("Elif Şahin", "elif@x.com"),
        ("Engin Vardar", "engin@x.com"),
        ("Burak Çelik", "burak@x.com"),
        ("Selin Arslan", "selin@x.com"),
        ("Can Öztürk", "can@x.com"),
        ("Deniz Aydın", "deniz@x.com"),
        ("Gizem Koç", "gizem@x.com"),
    ]
}

fn resolver_for(path: &std::path::Path) -> ContactResolver {
    ContactResolver::new(Arc::new(FileContactStore::new(path)))
}

#[tokio::test]
async fn partial_name_resolves() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("contacts.json");
    write_table(&path, &ten_people());
    let r = resolver_for(&path);
    assert_eq!(r.find("Engin").await, ContactLookup::Found("engin@x.com".into()));
    assert_eq!(r.find("  ENGIN vardar ").await, ContactLookup::Found("engin@x.com".into()));
}

#[tokio::test]
async fn nonsense_is_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("contacts.json");
    write_table(&path, &ten_people());
    let r = resolver_for(&path);
    assert_eq!(r.find("xyzzyzzz").await, ContactLookup::NotFound);
    assert_eq!(r.find("xyzzyzzz").await.to_string(), "not found");
}

#[tokio::test]
async fn typo_resolves_through_similarity() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("contacts.json");
    write_table(&path, &ten_people());
    let r = resolver_for(&path);
    assert_eq!(r.find("Zeynep Kya").await, ContactLookup::Found("zeynep@x.com".into()));
}

#[tokio::test]
async fn first_containment_match_wins() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("contacts.json");
    write_table(
        &path,
        &[("Ali Veli", "ali.veli@x.com"), ("Ali Can", "ali.can@x.com")],
    );
    let r = resolver_for(&path);
    assert_eq!(r.find("ali").await, ContactLookup::Found("ali.veli@x.com".into()));
}

#[tokio::test]
async fn header_only_table_is_empty() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("contacts.json");
    write_table(&path, &[]);
    let r = resolver_for(&path);
    assert_eq!(r.find("Engin").await, ContactLookup::Empty);
}

#[tokio::test]
async fn missing_table_is_created_with_header() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("contacts.json");
    let r = resolver_for(&path);
    assert_eq!(r.find("Engin").await, ContactLookup::Empty);

    let rows: Vec<Vec<String>> =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(rows, vec![vec!["Name".to_string(), "Email".to_string()]]);

    r.add_contact("Engin Vardar", "engin@x.com").await.unwrap();
    assert_eq!(r.find("engin").await, ContactLookup::Found("engin@x.com".into()));
    assert_eq!(r.list().await.unwrap().len(), 1);
}

#[tokio::test]
async fn corrupt_table_is_reported_not_raised() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("contacts.json");
    std::fs::write(&path, "{ not a table").unwrap();
    let r = resolver_for(&path);
    let lookup = r.find("Engin").await;
    assert!(matches!(lookup, ContactLookup::Unreachable(_)));
    assert!(lookup.to_string().starts_with("error: contact table unreachable:"));
}

/// Store that counts how often the table is located and can refuse access.
struct CountingStore {
    locates: AtomicUsize,
    fail: bool,
}

#[async_trait]
impl ContactStore for CountingStore {
    async fn locate(&self) -> anyhow::Result<Option<SheetHandle>> {
        self.locates.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            anyhow::bail!("permission denied");
        }
        Ok(Some(SheetHandle("mem".into())))
    }

    async fn create(&self) -> anyhow::Result<SheetHandle> {
        anyhow::bail!("permission denied")
    }

    async fn read_rows(&self, _sheet: &SheetHandle) -> anyhow::Result<Vec<Vec<String>>> {
        Ok(vec![
            vec!["Name".into(), "Email".into()],
            vec!["Engin Vardar".into(), "engin@x.com".into()],
        ])
    }

    async fn append_row(&self, _sheet: &SheetHandle, _row: Vec<String>) -> anyhow::Result<()> {
        Ok(())
    }
}

#[tokio::test]
async fn sheet_handle_is_resolved_once() {
    let store = Arc::new(CountingStore {
        locates: AtomicUsize::new(0),
        fail: false,
    });
    let r = ContactResolver::new(store.clone());
    for _ in 0..3 {
        assert_eq!(r.find("engin").await, ContactLookup::Found("engin@x.com".into()));
    }
    assert_eq!(store.locates.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn unreachable_store_yields_sentinel_and_is_retried() {
    let store = Arc::new(CountingStore {
        locates: AtomicUsize::new(0),
        fail: true,
    });
    let r = ContactResolver::new(store.clone());
    assert!(matches!(r.find("engin").await, ContactLookup::Unreachable(_)));
    assert!(matches!(r.find("engin").await, ContactLookup::Unreachable(_)));
    // failed initialisation is not cached
    assert_eq!(store.locates.load(Ordering::SeqCst), 2);
}
