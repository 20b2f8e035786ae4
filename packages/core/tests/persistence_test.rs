//! Persistence Tests
//!
//! Save/remove state machine against the in-memory adapter: state inference,
//! identities, batch transactions, inheritance, default values, the permission
//! gate and query caching.

#[cfg(test)]
mod persistence_tests {
    use anyhow::Result;
    use async_trait::async_trait;
    use datamodel_core::db::Statement;
    use datamodel_core::{
        DataConfiguration, DataContext, DataError, DataObject, DataSettings, MemoryAdapter,
        PermissionDecision, PermissionEvaluator, PermissionMode, PermissionRequest,
    };
    use serde_json::{json, Value};
    use std::sync::Arc;

    const PEOPLE: &str = r#"[
      { "name": "Person", "fields": [
          { "name": "id", "type": "Counter", "primary": true },
          { "name": "name", "type": "Text", "nullable": false },
          { "name": "email", "type": "Text" } ],
        "constraints": [ { "type": "unique", "fields": ["email"] } ] },
      { "name": "Party", "abstract": true, "fields": [
          { "name": "id", "type": "Counter", "primary": true },
          { "name": "name", "type": "Text", "nullable": false } ] },
      { "name": "Customer", "inherits": "Party", "fields": [
          { "name": "id", "type": "Counter", "primary": true },
          { "name": "vatNumber", "type": "Text" } ] },
      { "name": "Ticket", "fields": [
          { "name": "id", "type": "Counter", "primary": true },
          { "name": "title", "type": "Text" },
          { "name": "state", "type": "Text", "value": "open" },
          { "name": "createdBy", "type": "Text", "value": "fn:user" },
          { "name": "code", "type": "Text", "value": "fn:ticketCode" } ] },
      { "name": "Account", "fields": [
          { "name": "id", "type": "Counter", "primary": true },
          { "name": "login", "property": "userName", "type": "Text" } ],
        "constraints": [ { "type": "unique", "fields": ["login"] } ] },
      { "name": "Country", "caching": "always", "fields": [
          { "name": "id", "type": "Counter", "primary": true },
          { "name": "name", "type": "Text" } ] }
    ]"#;

    fn obj(value: Value) -> DataObject {
        value.as_object().cloned().unwrap_or_default()
    }

    fn configuration(settings: DataSettings) -> Result<Arc<DataConfiguration>> {
        let configuration = DataConfiguration::new(settings)?;
        configuration.register_models_json(PEOPLE)?;
        configuration.register_function("ticketCode", |ctx| {
            let title = ctx.target.get("title").and_then(Value::as_str).unwrap_or("");
            Ok(json!(format!("T-{}", title.len())))
        });
        Ok(Arc::new(configuration))
    }

    fn setup() -> Result<(DataContext, Arc<MemoryAdapter>)> {
        let adapter = Arc::new(MemoryAdapter::new());
        let context = DataContext::new(configuration(DataSettings::default())?, adapter.clone());
        Ok((context, adapter))
    }

    /// Allows everything for "admin", denies everyone else
    struct AdminOnly;

    #[async_trait]
    impl PermissionEvaluator for AdminOnly {
        async fn evaluate(
            &self,
            request: &PermissionRequest<'_>,
        ) -> Result<PermissionDecision, DataError> {
            Ok(if request.user == Some("admin") {
                PermissionDecision::Allow
            } else {
                PermissionDecision::Deny
            })
        }
    }

    fn selects_of(statements: &[Statement], entity: &str) -> usize {
        statements
            .iter()
            .filter(|s| matches!(s, Statement::Select(q) if q.entity == entity))
            .count()
    }

    #[tokio::test]
    async fn test_insert_assigns_identity() -> Result<()> {
        let (context, adapter) = setup()?;
        let person = context.model("Person")?;

        let mut jane = obj(json!({ "name": "Jane", "email": "jane@example.com" }));
        person.save(&mut jane).await?;
        let mut john = obj(json!({ "name": "John" }));
        person.save(&mut john).await?;

        assert_eq!(jane["id"], json!(1));
        assert_eq!(john["id"], json!(2));
        assert!(!jane.contains_key("$state"));
        assert_eq!(adapter.rows("Person").await?.len(), 2);

        Ok(())
    }

    #[tokio::test]
    async fn test_preallocated_identity_is_sent_with_insert() -> Result<()> {
        let adapter = Arc::new(MemoryAdapter::with_identity_preallocation());
        let context = DataContext::new(configuration(DataSettings::default())?, adapter.clone());
        let person = context.model("Person")?;

        let mut jane = obj(json!({ "name": "Jane" }));
        person.save(&mut jane).await?;
        assert_eq!(jane["id"], json!(1));

        let inserted = adapter.statements().await.into_iter().find_map(|s| match s {
            Statement::Insert { entity, values } if entity == "Person" => Some(values),
            _ => None,
        });
        assert_eq!(inserted.map(|values| values["id"].clone()), Some(json!(1)));

        Ok(())
    }

    #[tokio::test]
    async fn test_state_inference_by_key_and_unique_constraint() -> Result<()> {
        let (context, adapter) = setup()?;
        let person = context.model("Person")?;

        person
            .save(&mut obj(json!({ "name": "Jane", "email": "jane@example.com" })))
            .await?;

        // No key, but the email matches: the stored object is updated
        let mut janet = obj(json!({ "name": "Janet", "email": "jane@example.com" }));
        person.save(&mut janet).await?;
        assert_eq!(janet["id"], json!(1));

        // Existing key: update
        person.save(&mut obj(json!({ "id": 1, "name": "Jo" }))).await?;

        let rows = adapter.rows("Person").await?;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["name"], json!("Jo"));
        assert_eq!(rows[0]["email"], json!("jane@example.com"));

        // Unknown key: insert with the given key
        person.save(&mut obj(json!({ "id": 10, "name": "Ten" }))).await?;
        assert_eq!(adapter.rows("Person").await?.len(), 2);

        Ok(())
    }

    #[tokio::test]
    async fn test_explicit_state_overrides_inference() -> Result<()> {
        let (context, _adapter) = setup()?;
        let person = context.model("Person")?;

        person.save(&mut obj(json!({ "name": "Jane" }))).await?;

        let err = person
            .save(&mut obj(json!({ "$state": 2, "id": 99, "name": "Ghost" })))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "ENOTFOUND");

        let err = person
            .save(&mut obj(json!({ "$state": 3, "name": "Odd" })))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "EVALIDATE");

        let err = person
            .insert(&mut obj(json!({ "id": 1, "name": "Twice" })))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "EDB");

        Ok(())
    }

    #[tokio::test]
    async fn test_unique_violation_on_update() -> Result<()> {
        let (context, adapter) = setup()?;
        let person = context.model("Person")?;

        person
            .save(&mut obj(json!({ "name": "Jane", "email": "jane@example.com" })))
            .await?;
        person
            .save(&mut obj(json!({ "name": "John", "email": "john@example.com" })))
            .await?;

        let err = person
            .save(&mut obj(json!({ "id": 2, "email": "jane@example.com" })))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "EUNQ");
        assert!(err.is_validation_error());
        assert_eq!(adapter.rows("Person").await?[1]["email"], json!("john@example.com"));

        Ok(())
    }

    #[tokio::test]
    async fn test_unique_violation_through_property_alias() -> Result<()> {
        let (context, adapter) = setup()?;
        let account = context.model("Account")?;

        account.save(&mut obj(json!({ "userName": "jane" }))).await?;
        account.save(&mut obj(json!({ "userName": "john" }))).await?;
        assert_eq!(adapter.rows("Account").await?[1]["login"], json!("john"));

        let err = account
            .save(&mut obj(json!({ "id": 2, "userName": "jane" })))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "EUNQ");
        assert_eq!(adapter.rows("Account").await?[1]["login"], json!("john"));

        Ok(())
    }

    #[tokio::test]
    async fn test_batch_rolls_back_on_not_null_violation() -> Result<()> {
        let (context, adapter) = setup()?;
        let person = context.model("Person")?;

        let mut batch = vec![
            obj(json!({ "name": "Jane" })),
            obj(json!({ "email": "nameless@example.com" })),
        ];
        let err = person.save_many(&mut batch).await.unwrap_err();
        assert_eq!(err.code(), "ENULL");
        assert!(adapter.rows("Person").await?.is_empty());

        // The identity counter was rolled back with the rows
        let mut jane = obj(json!({ "name": "Jane" }));
        person.save(&mut jane).await?;
        assert_eq!(jane["id"], json!(1));

        Ok(())
    }

    #[tokio::test]
    async fn test_inherited_model_saves_base_first_and_removes_it_last() -> Result<()> {
        let (context, adapter) = setup()?;
        let customer = context.model("Customer")?;

        let mut acme = obj(json!({ "name": "Acme", "vatNumber": "EL123" }));
        customer.save(&mut acme).await?;
        assert_eq!(acme["id"], json!(1));

        assert_eq!(adapter.rows("Party").await?[0]["name"], json!("Acme"));
        assert_eq!(adapter.rows("Customer").await?[0]["vatNumber"], json!("EL123"));
        assert!(adapter.has_view("CustomerData").await);

        let stored = customer
            .where_("name")
            .equal("Acme")
            .first()
            .await?
            .expect("Acme should be readable through the view");
        assert_eq!(stored["vatNumber"], json!("EL123"));

        // Abstract base models refuse direct inserts
        let party = context.model("Party")?;
        let err = party
            .save(&mut obj(json!({ "name": "Loose" })))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "EVALIDATE");

        adapter.clear_statements().await;
        customer.remove(&mut obj(json!({ "id": 1 }))).await?;
        let deleted: Vec<String> = adapter
            .statements()
            .await
            .into_iter()
            .filter_map(|s| match s {
                Statement::Delete { entity, .. } => Some(entity),
                _ => None,
            })
            .collect();
        assert_eq!(deleted, vec!["Customer", "Party"]);
        assert!(adapter.rows("Party").await?.is_empty());

        Ok(())
    }

    #[tokio::test]
    async fn test_remove_by_unique_constraint() -> Result<()> {
        let (context, adapter) = setup()?;
        let person = context.model("Person")?;

        person
            .save(&mut obj(json!({ "name": "Jane", "email": "jane@example.com" })))
            .await?;

        let mut target = obj(json!({ "email": "jane@example.com" }));
        person.remove(&mut target).await?;
        assert_eq!(target["id"], json!(1));
        assert!(adapter.rows("Person").await?.is_empty());

        let err = person
            .remove(&mut obj(json!({ "email": "nobody@example.com" })))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "ENOTFOUND");

        Ok(())
    }

    #[tokio::test]
    async fn test_default_values_use_functions() -> Result<()> {
        let (context, _adapter) = setup()?;
        let ticket = context.with_user("alice").model("Ticket")?;

        let mut first = obj(json!({ "title": "Broken" }));
        ticket.save(&mut first).await?;
        assert_eq!(first["state"], json!("open"));
        assert_eq!(first["createdBy"], json!("alice"));
        assert_eq!(first["code"], json!("T-6"));

        // Supplied values are kept
        let mut second = obj(json!({ "title": "Slow", "state": "triaged" }));
        ticket.save(&mut second).await?;
        assert_eq!(second["state"], json!("triaged"));

        Ok(())
    }

    #[tokio::test]
    async fn test_permission_assert_mode() -> Result<()> {
        let adapter = Arc::new(MemoryAdapter::new());
        let base = DataContext::new(configuration(DataSettings::default())?, adapter.clone())
            .with_permissions(Arc::new(AdminOnly));

        let err = base
            .model("Person")?
            .save(&mut obj(json!({ "name": "Anon" })))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "EACCESS");
        assert_eq!(err.status(), Some(401));

        let bob = base.clone().with_user("bob").model("Person")?;
        let err = bob.save(&mut obj(json!({ "name": "Bob" }))).await.unwrap_err();
        assert_eq!(err.status(), Some(403));

        let admin = base.clone().with_user("admin").model("Person")?;
        admin.save(&mut obj(json!({ "name": "Root" }))).await?;
        assert_eq!(admin.queryable().get_items().await?.len(), 1);

        let err = bob.queryable().get_items().await.unwrap_err();
        assert_eq!(err.code(), "EACCESS");

        Ok(())
    }

    #[tokio::test]
    async fn test_permission_filter_mode() -> Result<()> {
        let settings = DataSettings {
            permission_mode: PermissionMode::Filter,
            ..Default::default()
        };
        let adapter = Arc::new(MemoryAdapter::new());
        let base = DataContext::new(configuration(settings)?, adapter.clone())
            .with_permissions(Arc::new(AdminOnly));

        let admin = base.clone().with_user("admin").model("Person")?;
        admin.save(&mut obj(json!({ "name": "Root" }))).await?;

        let bob = base.clone().with_user("bob").model("Person")?;
        assert!(bob.queryable().get_items().await?.is_empty());
        assert_eq!(bob.queryable().count().await?, 0);

        // Writes still fail in filter mode
        let err = bob.save(&mut obj(json!({ "name": "Bob" }))).await.unwrap_err();
        assert_eq!(err.code(), "EACCESS");
        assert_eq!(adapter.rows("Person").await?.len(), 1);

        Ok(())
    }

    #[tokio::test]
    async fn test_cached_queries_are_invalidated_by_writes() -> Result<()> {
        let (context, adapter) = setup()?;
        let country = context.model("Country")?;

        country.save(&mut obj(json!({ "name": "Greece" }))).await?;
        adapter.clear_statements().await;

        let first = country.queryable().get_items().await?;
        let second = country.queryable().get_items().await?;
        assert_eq!(first, second);
        assert_eq!(selects_of(&adapter.statements().await, "Country"), 1);

        country.save(&mut obj(json!({ "name": "Italy" }))).await?;
        adapter.clear_statements().await;

        let rows = country.queryable().get_items().await?;
        assert_eq!(rows.len(), 2);
        assert_eq!(selects_of(&adapter.statements().await, "Country"), 1);

        Ok(())
    }
}
