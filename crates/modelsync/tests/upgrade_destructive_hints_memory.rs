use asupersync::runtime::RuntimeBuilder;
use modelsync::prelude::*;
use modelsync_memory::MemoryStore;

fn unwrap_outcome<T>(outcome: Outcome<T, Error>) -> T {
    match outcome {
        Outcome::Ok(v) => v,
        Outcome::Err(e) => panic!("unexpected error: {e}"),
        Outcome::Cancelled(r) => panic!("cancelled: {r:?}"),
        Outcome::Panicked(p) => panic!("panicked: {p:?}"),
    }
}

fn unwrap_err<T: std::fmt::Debug>(outcome: Outcome<T, Error>) -> Error {
    match outcome {
        Outcome::Ok(v) => panic!("expected an error, got {v:?}"),
        Outcome::Err(e) => e,
        Outcome::Cancelled(r) => panic!("cancelled: {r:?}"),
        Outcome::Panicked(p) => panic!("panicked: {p:?}"),
    }
}

/// Contributes a fixed set of hints to every upgrade.
struct Hints(Vec<UpgradeHint>);

impl UpgradeHandler for Hints {
    fn add_upgrade_hints(&self, hints: &mut HintSet) {
        for hint in &self.0 {
            hints.add(hint.clone());
        }
    }
}

fn config(version: &str) -> DomainConfig {
    DomainConfig {
        upgrade: UpgradeConfig::default().version(version),
        ..DomainConfig::default()
    }
}

async fn insert(cx: &Cx, store: &MemoryStore, table: &str, columns: &[&str], values: Vec<Value>) {
    let columns: Vec<String> = columns.iter().map(|c| (*c).to_string()).collect();
    unwrap_outcome(store.insert(cx, table, &columns, &values).await);
}

async fn fetch_row(
    cx: &Cx,
    store: &MemoryStore,
    table: &str,
    key: i64,
    columns: &[&str],
) -> Vec<Row> {
    let columns: Vec<String> = columns.iter().map(|c| (*c).to_string()).collect();
    unwrap_outcome(
        store
            .fetch_by_keys(cx, table, "id", &[Value::BigInt(key)], &columns)
            .await,
    )
}

fn person_with_nickname(keep_nickname: bool) -> ModelRegistry {
    let mut person = TypeDef::new("app.Person")
        .hierarchy(HierarchyDef::new(InheritanceSchema::SingleTable))
        .field(FieldDef::scalar("name", ValueType::Text));
    if keep_nickname {
        person = person.field(FieldDef::scalar("nickname", ValueType::Text).nullable());
    }
    ModelRegistry::builder()
        .register(person)
        .build()
        .expect("valid registry")
}

#[test]
fn dropping_a_field_without_a_hint_is_refused() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    rt.block_on(async {
        let store = MemoryStore::new();
        unwrap_outcome(
            Domain::build(
                &cx,
                &store,
                person_with_nickname(true),
                config("1"),
                &DefaultUpgradeHandler,
            )
            .await,
        );
        insert(
            &cx,
            &store,
            "app_Person",
            &["id", "type_id", "name", "nickname"],
            vec![
                Value::BigInt(1),
                Value::from("app.Person"),
                Value::from("ada"),
                Value::from("the countess"),
            ],
        )
        .await;

        let err = unwrap_err(
            Domain::build(
                &cx,
                &store,
                person_with_nickname(false),
                config("2"),
                &DefaultUpgradeHandler,
            )
            .await,
        );
        assert!(err.is_synchronization(), "got: {err}");
        let offenders = err.offenders().expect("synchronization offenders");
        assert!(
            offenders.iter().any(|o| o.contains("app_Person.nickname")),
            "offenders: {offenders:?}"
        );

        // The refused upgrade must not have touched storage.
        let schema = unwrap_outcome(store.introspect(&cx).await);
        assert!(schema.table("app_Person").is_some_and(|t| t.has_column("nickname")));
        let rows = fetch_row(&cx, &store, "app_Person", 1, &["nickname"]).await;
        assert_eq!(rows[0].get_by_name("nickname"), Some(&Value::from("the countess")));
    });
}

#[test]
fn a_remove_field_hint_authorizes_the_column_drop() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    rt.block_on(async {
        let store = MemoryStore::new();
        unwrap_outcome(
            Domain::build(
                &cx,
                &store,
                person_with_nickname(true),
                config("1"),
                &DefaultUpgradeHandler,
            )
            .await,
        );
        insert(
            &cx,
            &store,
            "app_Person",
            &["id", "type_id", "name", "nickname"],
            vec![
                Value::BigInt(1),
                Value::from("app.Person"),
                Value::from("ada"),
                Value::from("the countess"),
            ],
        )
        .await;

        let handler = Hints(vec![UpgradeHint::RemoveField {
            type_name: "app.Person".to_string(),
            field: "nickname".to_string(),
        }]);
        let domain = unwrap_outcome(
            Domain::build(&cx, &store, person_with_nickname(false), config("2"), &handler).await,
        );
        assert!(domain.upgrade_report().inert_hints.is_empty());
        assert!(domain.upgrade_report().applied >= 1);

        let schema = unwrap_outcome(store.introspect(&cx).await);
        assert!(schema.table("app_Person").is_some_and(|t| !t.has_column("nickname")));
        let rows = fetch_row(&cx, &store, "app_Person", 1, &["name"]).await;
        assert_eq!(rows[0].get_by_name("name"), Some(&Value::from("ada")));
    });
}

fn staff(schemas: InheritanceSchema, keep_employee: bool) -> ModelRegistry {
    let mut builder = ModelRegistry::builder()
        .register(
            TypeDef::new("app.Person")
                .hierarchy(HierarchyDef::new(schemas))
                .field(FieldDef::scalar("name", ValueType::Text)),
        )
        .register(
            TypeDef::new("app.Customer")
                .parent("app.Person")
                .field(FieldDef::scalar("loyalty", ValueType::BigInt).nullable()),
        );
    if keep_employee {
        builder = builder.register(
            TypeDef::new("app.Employee")
                .parent("app.Person")
                .field(FieldDef::scalar("salary", ValueType::BigInt).nullable()),
        );
    }
    builder.build().expect("valid registry")
}

#[test]
fn dropping_a_type_without_a_hint_is_refused() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    rt.block_on(async {
        let store = MemoryStore::new();
        unwrap_outcome(
            Domain::build(
                &cx,
                &store,
                staff(InheritanceSchema::ClassTable, true),
                config("1"),
                &DefaultUpgradeHandler,
            )
            .await,
        );

        let err = unwrap_err(
            Domain::build(
                &cx,
                &store,
                staff(InheritanceSchema::ClassTable, false),
                config("2"),
                &DefaultUpgradeHandler,
            )
            .await,
        );
        assert!(err.is_synchronization(), "got: {err}");
        let offenders = err.offenders().expect("synchronization offenders");
        assert!(
            offenders.iter().any(|o| o.contains("table app_Employee")),
            "offenders: {offenders:?}"
        );
        let schema = unwrap_outcome(store.introspect(&cx).await);
        assert!(schema.contains_table("app_Employee"));
    });
}

#[test]
fn a_remove_type_hint_purges_shared_table_rows() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    rt.block_on(async {
        let store = MemoryStore::new();
        unwrap_outcome(
            Domain::build(
                &cx,
                &store,
                staff(InheritanceSchema::SingleTable, true),
                config("1"),
                &DefaultUpgradeHandler,
            )
            .await,
        );
        let seed: [(i64, &str, &str); 4] = [
            (1, "app.Person", "ada"),
            (2, "app.Employee", "grace"),
            (3, "app.Employee", "edsger"),
            (4, "app.Customer", "tim"),
        ];
        for (id, type_name, name) in seed {
            insert(
                &cx,
                &store,
                "app_Person",
                &["id", "type_id", "name"],
                vec![Value::BigInt(id), Value::from(type_name), Value::from(name)],
            )
            .await;
        }

        let handler = Hints(vec![UpgradeHint::RemoveType {
            type_name: "app.Employee".to_string(),
        }]);
        unwrap_outcome(
            Domain::build(
                &cx,
                &store,
                staff(InheritanceSchema::SingleTable, false),
                config("2"),
                &handler,
            )
            .await,
        );

        // Employee rows purged, their column dropped; everyone else keeps
        // their data.
        assert_eq!(store.row_count("app_Person"), Some(2));
        let schema = unwrap_outcome(store.introspect(&cx).await);
        let table = schema.table("app_Person").expect("root table");
        assert!(!table.has_column("salary"));
        assert!(table.has_column("loyalty"));
        assert!(fetch_row(&cx, &store, "app_Person", 2, &["id"]).await.is_empty());
        let customer = fetch_row(&cx, &store, "app_Person", 4, &["name", "type_id"]).await;
        assert_eq!(customer[0].get_by_name("name"), Some(&Value::from("tim")));
        assert_eq!(customer[0].get_by_name("type_id"), Some(&Value::from("app.Customer")));
    });
}

#[test]
fn a_remove_type_hint_drops_the_subtree_tables() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    rt.block_on(async {
        let store = MemoryStore::new();
        let full = ModelRegistry::builder()
            .register(
                TypeDef::new("app.Person")
                    .hierarchy(HierarchyDef::new(InheritanceSchema::ClassTable))
                    .field(FieldDef::scalar("name", ValueType::Text)),
            )
            .register(
                TypeDef::new("app.Employee")
                    .parent("app.Person")
                    .field(FieldDef::scalar("salary", ValueType::BigInt).nullable()),
            )
            .register(
                TypeDef::new("app.Manager")
                    .parent("app.Employee")
                    .field(FieldDef::scalar("level", ValueType::BigInt).nullable()),
            )
            .build()
            .expect("valid registry");
        unwrap_outcome(Domain::build(&cx, &store, full, config("1"), &DefaultUpgradeHandler).await);
        insert(
            &cx,
            &store,
            "app_Person",
            &["id", "name"],
            vec![Value::BigInt(1), Value::from("ada")],
        )
        .await;
        insert(
            &cx,
            &store,
            "app_Person",
            &["id", "name"],
            vec![Value::BigInt(2), Value::from("grace")],
        )
        .await;
        insert(
            &cx,
            &store,
            "app_Employee",
            &["id", "salary"],
            vec![Value::BigInt(2), Value::BigInt(120)],
        )
        .await;

        // One hint covers the whole Employee subtree, Manager included.
        let handler = Hints(vec![UpgradeHint::RemoveType {
            type_name: "app.Employee".to_string(),
        }]);
        let reduced = ModelRegistry::builder()
            .register(
                TypeDef::new("app.Person")
                    .hierarchy(HierarchyDef::new(InheritanceSchema::ClassTable))
                    .field(FieldDef::scalar("name", ValueType::Text)),
            )
            .build()
            .expect("valid registry");
        unwrap_outcome(Domain::build(&cx, &store, reduced, config("2"), &handler).await);

        let schema = unwrap_outcome(store.introspect(&cx).await);
        assert!(!schema.contains_table("app_Employee"));
        assert!(!schema.contains_table("app_Manager"));
        // Base rows lose their subtype and live on as plain persons.
        assert_eq!(store.row_count("app_Person"), Some(2));
        let rows = fetch_row(&cx, &store, "app_Person", 2, &["name"]).await;
        assert_eq!(rows[0].get_by_name("name"), Some(&Value::from("grace")));
    });
}
