use serde::{Deserialize, Serialize};
use vellumdb::{
    DbError, DescriptorRegistry, DocumentStore, IndexDescriptor, IndexModel, IsolationLevel,
    MemoryBackend, Persist, Tracked,
};

#[derive(Debug, Clone, Serialize, Deserialize, Persist)]
struct Person {
    id: i64,
    name: String,
}

impl Person {
    fn named(name: &str) -> Tracked<Person> {
        Tracked::new(Person {
            id: 0,
            name: name.to_string(),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, IndexModel)]
struct PersonByName {
    name: String,
    count: i64,
}

fn counting_registry() -> DescriptorRegistry {
    let mut registry = DescriptorRegistry::new();
    registry.register(
        IndexDescriptor::<Person, PersonByName>::map(|person| {
            vec![PersonByName {
                name: person.name.clone(),
                count: 1,
            }]
        })
        .grouped_by("name")
        .reduce(|rows| {
            let name = rows.first()?.name.clone();
            Some(PersonByName {
                name,
                count: rows.iter().map(|row| row.count).sum(),
            })
        })
        .on_delete(|current, deleted| {
            let count = current.count - deleted.iter().map(|row| row.count).sum::<i64>();
            (count > 0).then_some(PersonByName { count, ..current })
        }),
    );
    registry
}

fn store_over(backend: &MemoryBackend) -> DocumentStore {
    DocumentStore::new(backend.clone(), counting_registry())
}

#[tokio::test]
async fn id_round_trips_across_sessions() {
    let backend = MemoryBackend::new();
    let store = store_over(&backend);

    let person = Person::named("ada");
    let mut session = store.open_session();
    session.save(&person).unwrap();
    session.close().await.unwrap();

    let id = person.read().unwrap().id;
    assert_ne!(id, 0);
    assert_eq!(backend.document(id).await.unwrap().doc_type, "Person");

    let mut session = store.open_session();
    let fetched = session.get::<Person>(&[id]).await.unwrap();
    assert_eq!(fetched[0].read().unwrap().name, "ada");
    assert_eq!(fetched[0].read().unwrap().id, id);
    session.close().await.unwrap();
}

#[tokio::test]
async fn get_preserves_identity_within_a_session() {
    let backend = MemoryBackend::new();
    let store = store_over(&backend);

    let person = Person::named("ada");
    let mut session = store.open_session();
    session.save(&person).unwrap();
    session.close().await.unwrap();
    let id = person.read().unwrap().id;

    let mut session = store.open_session();
    let first = session.get::<Person>(&[id]).await.unwrap();
    let second = session.get::<Person>(&[id]).await.unwrap();
    assert!(first[0].ptr_eq(&second[0]));
    session.close().await.unwrap();
}

#[tokio::test]
async fn saved_entity_is_the_one_fetched_back() {
    let backend = MemoryBackend::new();
    let store = store_over(&backend);

    let person = Person::named("ada");
    let mut session = store.open_session();
    session.save(&person).unwrap();
    session.commit().await.unwrap();

    let id = person.read().unwrap().id;
    let fetched = session.get::<Person>(&[id]).await.unwrap();
    assert!(fetched[0].ptr_eq(&person));
    session.close().await.unwrap();
}

#[tokio::test]
async fn get_is_positional_and_allows_duplicates() {
    let backend = MemoryBackend::new();
    let store = store_over(&backend);

    let ada = Person::named("ada");
    let bob = Person::named("bob");
    let mut session = store.open_session();
    session.save(&ada).unwrap();
    session.save(&bob).unwrap();
    session.close().await.unwrap();

    let ada_id = ada.read().unwrap().id;
    let bob_id = bob.read().unwrap().id;

    let mut session = store.open_session();
    let fetched = session
        .get::<Person>(&[bob_id, ada_id, bob_id])
        .await
        .unwrap();
    assert_eq!(fetched[0].read().unwrap().name, "bob");
    assert_eq!(fetched[1].read().unwrap().name, "ada");
    assert!(fetched[0].ptr_eq(&fetched[2]));
    session.close().await.unwrap();
}

#[tokio::test]
async fn repeated_save_inserts_once() {
    let backend = MemoryBackend::new();
    let store = store_over(&backend);

    let person = Person::named("ada");
    let mut session = store.open_session();
    session.save(&person).unwrap();
    session.save(&person).unwrap();
    session.close().await.unwrap();

    assert_eq!(backend.document_count().await, 1);
    let rows = backend.index_rows("PersonByName").await;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].data["count"], 1);
}

#[tokio::test]
async fn unchanged_entity_commits_as_a_no_op() {
    let backend = MemoryBackend::new();
    let store = store_over(&backend);

    let person = Person::named("ada");
    let mut session = store.open_session();
    session.save(&person).unwrap();
    session.close().await.unwrap();
    let id = person.read().unwrap().id;

    let rows_before = backend.index_rows("PersonByName").await;
    let blob_before = backend.blob(id).await;

    let mut session = store.open_session();
    let fetched = session.get::<Person>(&[id]).await.unwrap();
    session.save(&fetched[0]).unwrap();
    session.commit().await.unwrap();
    session.close().await.unwrap();

    assert_eq!(backend.index_rows("PersonByName").await, rows_before);
    assert_eq!(backend.blob(id).await, blob_before);
    assert_eq!(backend.document_count().await, 1);
}

#[tokio::test]
async fn canceled_session_leaves_no_trace() {
    let backend = MemoryBackend::new();
    let store = store_over(&backend);

    let person = Person::named("ada");
    let mut session = store.open_session();
    session.save(&person).unwrap();
    session.cancel();
    session.cancel(); // idempotent
    session.close().await.unwrap();

    assert_eq!(person.read().unwrap().id, 0);
    assert_eq!(backend.document_count().await, 0);
    assert!(backend.index_rows("PersonByName").await.is_empty());
}

#[tokio::test]
async fn cancel_after_commit_rolls_back_everything() {
    let backend = MemoryBackend::new();
    let store = store_over(&backend);

    let person = Person::named("ada");
    let mut session = store.open_session();
    session.save(&person).unwrap();
    session.commit().await.unwrap();
    assert_ne!(person.read().unwrap().id, 0);

    session.cancel();
    session.close().await.unwrap();

    // The work ran inside the transaction, so rollback discards all of it.
    assert_eq!(backend.document_count().await, 0);
    assert!(backend.index_rows("PersonByName").await.is_empty());
}

#[tokio::test]
async fn isolation_level_is_locked_once_the_transaction_opens() {
    let backend = MemoryBackend::new();
    let store = store_over(&backend);

    let mut session = store.open_session();
    session
        .set_isolation_level(IsolationLevel::Serializable)
        .unwrap();

    session.commit().await.unwrap();
    let err = session
        .set_isolation_level(IsolationLevel::ReadCommitted)
        .unwrap_err();
    assert!(matches!(err, DbError::InvalidOperation(_)));
    session.close().await.unwrap();
}

#[tokio::test]
async fn saving_an_index_row_type_is_rejected() {
    #[derive(Debug, Clone, Serialize, Deserialize, Persist, IndexModel)]
    struct Rogue {
        id: i64,
        name: String,
    }

    let mut registry = DescriptorRegistry::new();
    registry.register(IndexDescriptor::<Person, Rogue>::map(|person| {
        vec![Rogue {
            id: 0,
            name: person.name.clone(),
        }]
    }));
    let store = DocumentStore::new(MemoryBackend::new(), registry);

    let mut session = store.open_session();
    let err = session
        .save(&Tracked::new(Rogue {
            id: 0,
            name: "x".into(),
        }))
        .unwrap_err();
    assert!(matches!(err, DbError::InvalidArgument(_)));
    session.close().await.unwrap();
}

#[tokio::test]
async fn deleting_an_unassigned_entity_fails() {
    let backend = MemoryBackend::new();
    let store = store_over(&backend);

    let mut session = store.open_session();
    session.delete(&Person::named("ghost")).unwrap();
    let err = session.commit().await.unwrap_err();
    assert!(matches!(err, DbError::InvalidOperation(_)));

    session.cancel();
    session.close().await.unwrap();
}

#[tokio::test]
async fn query_auto_flushes_pending_work() {
    let backend = MemoryBackend::new();
    let store = store_over(&backend);

    let mut session = store.open_session();
    session.save(&Person::named("ada")).unwrap();

    let rows = session
        .query::<PersonByName>()
        .await
        .unwrap()
        .filter_eq("name", "ada")
        .unwrap()
        .list()
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].count, 1);

    // Nothing is visible outside the session until close commits.
    assert!(backend.index_rows("PersonByName").await.is_empty());
    session.close().await.unwrap();
    assert_eq!(backend.index_rows("PersonByName").await.len(), 1);
}
