//! Association Tests
//!
//! End-to-end checks of inferred and explicit mappings: nested collections
//! written back on save, batch expansion on read and cascades on remove, all
//! against the in-memory adapter.

#[cfg(test)]
mod association_tests {
    use anyhow::Result;
    use datamodel_core::association::infer_mapping;
    use datamodel_core::db::Statement;
    use datamodel_core::{
        AssociationRole, CascadePolicy, DataAssociation, DataConfiguration, DataContext,
        DataObject, DataSettings, MemoryAdapter,
    };
    use serde_json::{json, Value};
    use std::sync::Arc;

    const SHOP: &str = r#"[
      { "name": "Person", "fields": [
          { "name": "id", "type": "Counter", "primary": true },
          { "name": "name", "type": "Text" },
          { "name": "skills", "type": "Text", "many": true },
          { "name": "orders", "type": "Order", "many": true },
          { "name": "groups", "type": "Group", "many": true } ] },
      { "name": "Group", "fields": [
          { "name": "id", "type": "Counter", "primary": true },
          { "name": "title", "type": "Text" },
          { "name": "members", "type": "Person", "many": true,
            "mapping": { "associationType": "junction", "parentModel": "Person",
                         "childModel": "Group", "associationAdapter": "PersonGroups" } } ] },
      { "name": "Order", "fields": [
          { "name": "id", "type": "Counter", "primary": true },
          { "name": "total", "type": "Number" },
          { "name": "customer", "type": "Person" } ] }
    ]"#;

    /// Helper to create a context over a fresh in-memory adapter
    fn setup() -> Result<(DataContext, Arc<MemoryAdapter>)> {
        let configuration = DataConfiguration::new(DataSettings::default())?;
        configuration.register_models_json(SHOP)?;
        let adapter = Arc::new(MemoryAdapter::new());
        let context = DataContext::new(Arc::new(configuration), adapter.clone());
        Ok((context, adapter))
    }

    fn obj(value: Value) -> DataObject {
        value.as_object().cloned().unwrap_or_default()
    }

    #[tokio::test]
    async fn test_tag_junction_round_trip_and_cascade() -> Result<()> {
        let (context, adapter) = setup()?;
        let person = context.model("Person")?;

        let mut jane = obj(json!({ "name": "Jane", "skills": ["js", "rust"] }));
        person.save(&mut jane).await?;
        assert_eq!(jane["id"], json!(1));
        assert!(adapter.has_table("PersonSkills").await);
        assert_eq!(adapter.rows("PersonSkills").await?.len(), 2);

        let stored = person
            .where_("id")
            .equal(1)
            .expand(&["skills"])
            .first()
            .await?
            .expect("Jane should be stored");
        assert_eq!(stored["skills"], json!(["js", "rust"]));

        // Link new values first, then unlink the deleted ones
        let mut change = obj(json!({ "id": 1, "skills": { "items": ["go"], "deleted": ["js"] } }));
        person.save(&mut change).await?;
        let stored = person
            .where_("id")
            .equal(1)
            .expand(&["skills"])
            .first()
            .await?
            .expect("Jane should be stored");
        assert_eq!(stored["skills"], json!(["rust", "go"]));

        person.remove(&mut obj(json!({ "id": 1 }))).await?;
        assert!(adapter.rows("Person").await?.is_empty());
        assert!(adapter.rows("PersonSkills").await?.is_empty());

        Ok(())
    }

    #[tokio::test]
    async fn test_many_to_one_resolves_object_references() -> Result<()> {
        let (context, adapter) = setup()?;
        let person = context.model("Person")?;
        let order = context.model("Order")?;

        let (mapping, role) = order
            .mapping_role("customer")?
            .expect("customer should be an association");
        assert_eq!(role, AssociationRole::HasOne);
        let fk = mapping.as_foreign_key().expect("foreign key mapping");
        assert_eq!(fk.parent_model, "Person");
        assert_eq!(fk.child_field, "customer");
        assert_eq!(fk.refers_to.as_deref(), Some("orders"));

        person.save(&mut obj(json!({ "name": "Jane" }))).await?;
        let mut first = obj(json!({ "total": 10, "customer": { "name": "Jane" } }));
        order.save(&mut first).await?;
        assert_eq!(adapter.rows("Order").await?[0]["customer"], json!(1));

        let mut missing = obj(json!({ "total": 5, "customer": { "name": "Nobody" } }));
        let err = order.save(&mut missing).await.unwrap_err();
        assert_eq!(err.code(), "EDATA");
        assert_eq!(adapter.rows("Order").await?.len(), 1);

        person.save(&mut obj(json!({ "name": "Jane" }))).await?;
        let mut ambiguous = obj(json!({ "total": 7, "customer": { "name": "Jane" } }));
        let err = order.save(&mut ambiguous).await.unwrap_err();
        assert!(err.is_association_error());

        Ok(())
    }

    #[tokio::test]
    async fn test_one_to_many_write_back_expand_and_cascade_null() -> Result<()> {
        let (context, adapter) = setup()?;
        let person = context.model("Person")?;

        let mut jane = obj(json!({
            "name": "Jane",
            "orders": [ { "total": 10 }, { "total": 20 } ]
        }));
        person.save(&mut jane).await?;

        let orders = adapter.rows("Order").await?;
        assert_eq!(orders.len(), 2);
        assert!(orders.iter().all(|o| o["customer"] == json!(1)));
        assert_eq!(jane["orders"][0]["id"], json!(1));

        let stored = person
            .select(&["id", "name", "orders"])
            .first()
            .await?
            .expect("Jane should be stored");
        assert_eq!(stored["orders"].as_array().map(Vec::len), Some(2));
        assert_eq!(stored["orders"][1]["total"], json!(20));

        // Person.orders is inferred with a null cascade
        let (mapping, _) = person.mapping_role("orders")?.expect("orders mapping");
        assert_eq!(mapping.cascade(), CascadePolicy::Null);

        person.remove(&mut obj(json!({ "id": 1 }))).await?;
        let orders = adapter.rows("Order").await?;
        assert_eq!(orders.len(), 2);
        assert!(orders.iter().all(|o| o["customer"].is_null()));

        Ok(())
    }

    #[tokio::test]
    async fn test_model_junction_links_both_sides() -> Result<()> {
        let (context, adapter) = setup()?;
        let person = context.model("Person")?;
        let group = context.model("Group")?;

        group.save(&mut obj(json!({ "title": "admins" }))).await?;
        let mut jane = obj(json!({
            "name": "Jane",
            "groups": [ { "id": 1 }, { "title": "devs" } ]
        }));
        person.save(&mut jane).await?;

        // Unsaved group objects are inserted before they are linked
        assert_eq!(adapter.rows("Group").await?.len(), 2);
        assert_eq!(adapter.rows("PersonGroups").await?.len(), 2);

        let stored = person
            .where_("name")
            .equal("Jane")
            .expand(&["groups"])
            .first()
            .await?
            .expect("Jane should be stored");
        let titles: Vec<&Value> = stored["groups"]
            .as_array()
            .map(|groups| groups.iter().map(|g| &g["title"]).collect())
            .unwrap_or_default();
        assert_eq!(titles, vec![&json!("admins"), &json!("devs")]);

        let admins = group
            .where_("id")
            .equal(1)
            .expand(&["members"])
            .first()
            .await?
            .expect("admins should be stored");
        assert_eq!(admins["members"][0]["name"], json!("Jane"));

        match person.association(&jane, "groups").await? {
            DataAssociation::Junction(junction) => {
                assert_eq!(junction.junction().name(), "PersonGroups");
                assert_eq!(junction.count().await?, 2);
                assert_eq!(junction.remove(&json!(2)).await?, 1);
                let linked = junction.queryable()?.get_items().await?;
                assert_eq!(linked.len(), 1);
                assert_eq!(linked[0]["title"], json!("admins"));
            }
            other => panic!("Expected a junction, got {:?}", other),
        }

        Ok(())
    }

    #[tokio::test]
    async fn test_explicit_mapping_is_normalized_once() -> Result<()> {
        let (context, _adapter) = setup()?;
        let configuration = context.configuration();

        let first = infer_mapping(configuration, "Group", "members")?.expect("members mapping");
        let second = infer_mapping(configuration, "Group", "members")?.expect("members mapping");
        assert_eq!(first, second);

        let junction = first.as_junction().expect("junction mapping");
        assert_eq!(junction.association_adapter, "PersonGroups");
        assert_eq!(junction.parent_field, "id");
        assert_eq!(junction.child_field, "id");
        assert_eq!(junction.association_object_field, "parentId");
        assert_eq!(junction.association_value_field, "valueId");
        assert_eq!(first.role_of("Group", "members"), AssociationRole::ParentJunction);

        // Both sides resolve to the same table
        let inferred = infer_mapping(configuration, "Person", "groups")?.expect("groups mapping");
        assert_eq!(
            inferred.as_junction().map(|j| j.association_adapter.as_str()),
            Some("PersonGroups")
        );

        Ok(())
    }

    #[tokio::test]
    async fn test_junction_expand_over_many_parents_is_batched() -> Result<()> {
        let (context, adapter) = setup()?;
        let person = context.model("Person")?;
        let group = context.model("Group")?;

        group.save(&mut obj(json!({ "title": "admins" }))).await?;
        group.save(&mut obj(json!({ "title": "devs" }))).await?;
        let mut people = vec![
            obj(json!({ "name": "Jane", "groups": [ { "id": 1 }, { "id": 2 } ] })),
            obj(json!({ "name": "John", "groups": [ { "id": 2 } ] })),
            obj(json!({ "name": "Mary", "groups": [ { "id": 1 } ] })),
        ];
        person.save_many(&mut people).await?;
        adapter.clear_statements().await;

        let rows = person
            .where_("id")
            .greater_than(0)
            .expand(&["groups"])
            .order_by("id")
            .get_items()
            .await?;
        let counts: Vec<Option<usize>> = rows
            .iter()
            .map(|row| row["groups"].as_array().map(Vec::len))
            .collect();
        assert_eq!(counts, vec![Some(2), Some(1), Some(1)]);
        assert_eq!(rows[1]["groups"][0]["title"], json!("devs"));

        let selects = |entity: &str, statements: &[Statement]| {
            statements
                .iter()
                .filter(|s| matches!(s, Statement::Select(q) if q.entity == entity))
                .count()
        };
        let statements = adapter.statements().await;
        assert_eq!(selects("PersonGroups", &statements), 1);
        assert_eq!(selects("Group", &statements), 1);

        Ok(())
    }
}
