use oxigraph::model::{NamedNode, Term};
use rdfmap::api::{EntityManagerFactory, EntityState};
use rdfmap::datasource::{DataSource, MutableDataSource, TripleSource};
use rdfmap::errors::ErrorKind;
use rdfmap::instance::PropertyValue;
use rdfmap::memory::MemoryDataSource;
use rdfmap::metadata::MetadataIndex;
use rdfmap::options::{Cascade, CollectionKind, LifecycleEvent};
use rdfmap::schema::{Property, Schema};
use rdfmap::{RdfId, Record, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

const EX: &str = "http://example.org/";
const FOAF: &str = "http://xmlns.com/foaf/0.1/";
const NOTES: &str = "http://example.org/graphs/notes";

static LOADED: AtomicUsize = AtomicUsize::new(0);

fn index() -> Arc<MetadataIndex> {
    let index = Arc::new(MetadataIndex::new());
    index.register(
        Schema::entity("Person")
            .namespace("foaf", FOAF)
            .namespace("ex", EX)
            .rdf_type("foaf:Person")
            .id_field("id")
            .field("name", Property::new("foaf:name"))
            .field("age", Property::new("foaf:age"))
            .field(
                "knows",
                Property::relation("foaf:knows", "Person")
                    .many(CollectionKind::Set)
                    .lazy(),
            )
            .field(
                "address",
                Property::relation("ex:address", "Address")
                    .cascade(Cascade::Persist)
                    .cascade(Cascade::Remove),
            )
            .field(
                "employer",
                Property::relation("ex:employer", "Organization").cascade(Cascade::Persist),
            )
            .on(LifecycleEvent::PrePersist, |r: &mut Record| {
                if r.value("name")?.is_none() {
                    r.set("name", "anonymous")?;
                }
                Ok(())
            })
            .on(LifecycleEvent::PostLoad, |_: &mut Record| {
                LOADED.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .build(),
    );
    index.register(
        Schema::entity("Address")
            .namespace("ex", EX)
            .rdf_type("ex:Address")
            .id_field("id")
            .field("city", Property::new("ex:city"))
            .build(),
    );
    index.register(
        Schema::entity("Organization")
            .namespace("ex", EX)
            .rdf_type("ex:Organization")
            .id_field("id")
            .field("label", Property::new("ex:label"))
            .build(),
    );
    index.register(
        Schema::entity("Note")
            .rdf_type("http://example.org/Note")
            .named_graph(NOTES)
            .id_field("id")
            .field("text", Property::new("http://example.org/text"))
            .build(),
    );
    index
}

fn setup() -> (Arc<MemoryDataSource>, EntityManagerFactory) {
    let _ = env_logger::builder().is_test(true).try_init();
    let ds = Arc::new(MemoryDataSource::new().unwrap());
    let shared: Arc<dyn DataSource> = ds.clone();
    (ds, EntityManagerFactory::new(shared, index()))
}

fn person(iri: &str) -> RdfId {
    RdfId::iri(format!("{}people/{}", EX, iri)).unwrap()
}

fn knows() -> NamedNode {
    NamedNode::new(format!("{}knows", FOAF)).unwrap()
}

#[test]
fn eager_entity_round_trips() {
    let (_, factory) = setup();
    let mut em = factory.create_entity_manager();
    let id = person("ada");
    let mut address = em.create("Address").unwrap();
    address.set("city", "London").unwrap();
    let mut ada = em.create("Person").unwrap().with_id(id.clone()).unwrap();
    ada.set("name", "Ada").unwrap();
    ada.set("age", 36).unwrap();
    ada.set("address", address).unwrap();
    em.persist(&mut ada).unwrap();

    let mut other = factory.create_entity_manager();
    let found = other.find("Person", &id).unwrap().unwrap();
    assert_eq!(found.id(), Some(&id));
    assert_eq!(found.value("name").unwrap(), Some(&Value::from("Ada")));
    assert_eq!(found.value("age").unwrap(), Some(&Value::Int(36)));
    let found_address = found.value("address").unwrap().unwrap().as_entity().unwrap();
    assert_eq!(
        found_address.value("city").unwrap(),
        Some(&Value::from("London"))
    );
    assert_eq!(found.value("address").unwrap(), ada.value("address").unwrap());
    assert!(other.contains(&found));
}

#[test]
fn missing_resources_are_not_found() {
    let (_, factory) = setup();
    let mut em = factory.create_entity_manager();
    assert!(em.find("Person", &person("nobody")).unwrap().is_none());
}

#[test]
fn identity_cannot_be_rebound() {
    let (_, factory) = setup();
    let em = factory.create_entity_manager();
    let mut record = em.create("Person").unwrap();
    record.set_id(person("a")).unwrap();
    record.set_id(person("a")).unwrap();
    let err = record.set_id(person("b")).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::IdentityImmutable);
    assert_eq!(record.id(), Some(&person("a")));
}

#[test]
fn persist_without_id_assigns_a_blank_node() {
    let (_, factory) = setup();
    let mut em = factory.create_entity_manager();
    let mut record = em.create("Person").unwrap();
    record.set("name", "Grace").unwrap();
    em.persist(&mut record).unwrap();
    let id = record.id().cloned().unwrap();
    assert!(id.is_blank());

    let found = em.find("Person", &id).unwrap().unwrap();
    assert_eq!(found.id(), Some(&id));
    assert_eq!(found.value("name").unwrap(), record.value("name").unwrap());
}

#[test]
fn cascaded_persist_stores_the_related_entity() {
    let (ds, factory) = setup();
    let mut em = factory.create_entity_manager();
    let mut org = em.create("Organization").unwrap();
    org.set("label", "Analytical Engines").unwrap();
    let mut ada = em.create("Person").unwrap().with_id(person("ada")).unwrap();
    ada.set("employer", org).unwrap();
    em.persist(&mut ada).unwrap();

    let org_id = ada
        .value("employer")
        .unwrap()
        .and_then(Value::as_id)
        .cloned()
        .unwrap();
    let employer = NamedNode::new(format!("{}employer", EX)).unwrap();
    let links = ds
        .statements(Some(&person("ada")), Some(&employer), None, None)
        .unwrap();
    assert_eq!(links.len(), 1);
    let linked: Vec<Term> = links.iter().map(|t| t.object.into_owned()).collect();
    assert_eq!(linked, vec![org_id.to_term()]);
    assert!(!ds.statements(Some(&org_id), None, None, None).unwrap().is_empty());
}

#[test]
fn unsaved_reference_without_cascade_is_rejected() {
    let (_, factory) = setup();
    let mut em = factory.create_entity_manager();
    let stranger = em.create("Person").unwrap();
    let mut ada = em.create("Person").unwrap().with_id(person("ada")).unwrap();
    ada.add("knows", stranger).unwrap();
    let err = em.persist(&mut ada).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::IllegalState);
}

#[test]
fn merge_leaves_untouched_lazy_collections_alone() {
    let (ds, factory) = setup();
    let mut em = factory.create_entity_manager();
    let friends: Vec<RdfId> = (0..4).map(|i| person(&format!("friend{}", i))).collect();
    for friend in &friends {
        let mut record = em.create("Person").unwrap().with_id(friend.clone()).unwrap();
        em.persist(&mut record).unwrap();
    }
    let mut ada = em.create("Person").unwrap().with_id(person("ada")).unwrap();
    ada.set_all("knows", friends.iter().cloned().map(Value::Resource))
        .unwrap();
    em.persist(&mut ada).unwrap();

    let mut session = factory.create_entity_manager();
    let mut found = session.find("Person", &person("ada")).unwrap().unwrap();
    found.set("name", "Ada Lovelace").unwrap();
    session.merge(&mut found).unwrap();

    match found.property("knows") {
        Some(PropertyValue::Lazy(lazy)) => {
            assert!(!lazy.is_materialized());
            assert_eq!(lazy.known_ids().len(), 4);
        }
        other => panic!("expected a lazy collection, got {:?}", other),
    }
    let stored = ds
        .statements(Some(&person("ada")), Some(&knows()), None, None)
        .unwrap();
    assert_eq!(stored.len(), 4);

    let mut reloaded = session.find("Person", &person("ada")).unwrap().unwrap();
    assert_eq!(
        reloaded.value("name").unwrap(),
        Some(&Value::from("Ada Lovelace"))
    );
    assert_eq!(reloaded.collection("knows").unwrap().len(), 4);
}

#[test]
fn repeated_merges_grow_collections_monotonically() {
    let (ds, factory) = setup();
    let mut em = factory.create_entity_manager();
    let mut ada = em.create("Person").unwrap().with_id(person("ada")).unwrap();
    ada.set("name", "Ada").unwrap();
    em.persist(&mut ada).unwrap();

    for i in 0..3 {
        let mut session = factory.create_entity_manager();
        let mut found = session.find("Person", &person("ada")).unwrap().unwrap();
        found
            .add("knows", person(&format!("friend{}", i)))
            .unwrap();
        session.merge(&mut found).unwrap();
    }
    let stored = ds
        .statements(Some(&person("ada")), Some(&knows()), None, None)
        .unwrap();
    assert_eq!(stored.len(), 3);

    // a member added again by identifier is already in the set
    let mut session = factory.create_entity_manager();
    let mut found = session.find("Person", &person("ada")).unwrap().unwrap();
    assert!(!found.add("knows", person("friend1")).unwrap());
    assert_eq!(found.collection("knows").unwrap().len(), 3);
    session.merge(&mut found).unwrap();
    let stored = ds
        .statements(Some(&person("ada")), Some(&knows()), None, None)
        .unwrap();
    assert_eq!(stored.len(), 3);
}

#[test]
fn lifecycle_callbacks_fire() {
    let (_, factory) = setup();
    let mut em = factory.create_entity_manager();
    let mut nameless = em.create("Person").unwrap().with_id(person("x")).unwrap();
    em.persist(&mut nameless).unwrap();
    assert_eq!(
        nameless.value("name").unwrap(),
        Some(&Value::from("anonymous"))
    );
    let before = LOADED.load(Ordering::SeqCst);
    let found = em.find("Person", &person("x")).unwrap().unwrap();
    assert!(LOADED.load(Ordering::SeqCst) > before);
    assert_eq!(found.value("name").unwrap(), Some(&Value::from("anonymous")));
}

#[test]
fn remove_follows_only_remove_cascades() {
    let (ds, factory) = setup();
    let mut em = factory.create_entity_manager();
    let mut address = em.create("Address").unwrap();
    address.set("city", "Paris").unwrap();
    let mut org = em.create("Organization").unwrap();
    org.set("label", "Bureau").unwrap();
    let mut ada = em.create("Person").unwrap().with_id(person("ada")).unwrap();
    ada.set("address", address).unwrap();
    ada.set("employer", org).unwrap();
    em.persist(&mut ada).unwrap();

    let address_id = ada.value("address").unwrap().and_then(Value::as_id).cloned().unwrap();
    let org_id = ada.value("employer").unwrap().and_then(Value::as_id).cloned().unwrap();
    em.remove(&mut ada).unwrap();

    assert_eq!(em.state_of(&ada), EntityState::Removed);
    assert!(ds.statements(Some(&person("ada")), None, None, None).unwrap().is_empty());
    assert!(ds.statements(Some(&address_id), None, None, None).unwrap().is_empty());
    assert!(!ds.statements(Some(&org_id), None, None, None).unwrap().is_empty());
}

#[test]
fn remove_only_touches_the_graph_of_the_type() {
    let (ds, factory) = setup();
    let mut em = factory.create_entity_manager();
    let mut ada = em.create("Person").unwrap().with_id(person("ada")).unwrap();
    ada.set("name", "Ada").unwrap();
    em.persist(&mut ada).unwrap();
    let archive = NamedNode::new(format!("{}graphs/archive", EX)).unwrap();
    let stored = ds.statements(Some(&person("ada")), None, None, None).unwrap();
    ds.add_to(&archive, &stored).unwrap();
    assert_eq!(ds.stats().unwrap().num_quads, 2 * stored.len());

    em.remove(&mut ada).unwrap();
    assert!(ds
        .default_graph_statements(Some(&person("ada")), None, None)
        .unwrap()
        .is_empty());
    assert_eq!(
        ds.statements(Some(&person("ada")), None, None, Some(&archive)).unwrap(),
        stored
    );
    assert_eq!(ds.stats().unwrap().num_quads, stored.len());
}

#[test]
fn refresh_discards_unsaved_changes() {
    let (_, factory) = setup();
    let mut em = factory.create_entity_manager();
    let mut ada = em.create("Person").unwrap().with_id(person("ada")).unwrap();
    ada.set("name", "Ada").unwrap();
    em.persist(&mut ada).unwrap();

    let key = ada.key();
    ada.set("name", "Someone else").unwrap();
    em.refresh(&mut ada).unwrap();
    assert_eq!(ada.key(), key);
    assert_eq!(ada.value("name").unwrap(), Some(&Value::from("Ada")));
    assert!(em.contains(&ada));
}

#[test]
fn entities_with_a_named_graph_are_stored_there() {
    let (ds, factory) = setup();
    let mut em = factory.create_entity_manager();
    let id = RdfId::iri("http://example.org/notes/1").unwrap();
    let mut note = em.create("Note").unwrap().with_id(id.clone()).unwrap();
    note.set("text", "remember the milk").unwrap();
    em.persist(&mut note).unwrap();

    let graph = NamedNode::new(NOTES).unwrap();
    assert_eq!(
        ds.statements(Some(&id), None, None, Some(&graph)).unwrap().len(),
        2
    );
    let found = em.find("Note", &id).unwrap().unwrap();
    assert_eq!(
        found.value("text").unwrap(),
        Some(&Value::from("remember the milk"))
    );
}
