//! Default and calculated values
//!
//! Both listeners evaluate a `FieldExpression`: literals are copied, `fn:`
//! expressions call the configuration's function table.

use crate::events::{DataEventArgs, DataEventListener};
use crate::models::{DataObjectState, FieldExpression};
use crate::services::{DataError, FunctionContext};
use async_trait::async_trait;
use serde_json::Value;

fn evaluate(
    args: &DataEventArgs,
    field: &str,
    expression: &FieldExpression,
) -> Result<Value, DataError> {
    match expression {
        FieldExpression::Literal(value) => Ok(value.clone()),
        FieldExpression::Function(name) => {
            let context = args.model.context();
            let ctx = FunctionContext {
                model: args.model.name(),
                field,
                user: context.user(),
                target: &args.target,
            };
            context.configuration().evaluate_function(name, &ctx)
        }
    }
}

/// Fills missing attributes of inserted objects with their default value
pub struct DefaultValueListener;

#[async_trait]
impl DataEventListener for DefaultValueListener {
    fn name(&self) -> &str {
        "DefaultValueListener"
    }

    async fn before_save(&self, args: &mut DataEventArgs) -> Result<(), DataError> {
        if args.state != DataObjectState::Insert {
            return Ok(());
        }
        let attributes = args.model.attributes()?;
        for attribute in attributes.iter() {
            let Some(expression) = &attribute.value else {
                continue;
            };
            let property = attribute.property_name();
            if args.target.get(property).map_or(true, Value::is_null) {
                let value = evaluate(args, &attribute.name, expression)?;
                args.target.insert(property.to_string(), value);
            }
        }
        Ok(())
    }
}

/// Recalculates calculated attributes on every save
pub struct CalculatedValueListener;

#[async_trait]
impl DataEventListener for CalculatedValueListener {
    fn name(&self) -> &str {
        "CalculatedValueListener"
    }

    async fn before_save(&self, args: &mut DataEventArgs) -> Result<(), DataError> {
        let attributes = args.model.attributes()?;
        for attribute in attributes.iter() {
            if let Some(expression) = &attribute.calculation {
                let value = evaluate(args, &attribute.name, expression)?;
                args.target
                    .insert(attribute.property_name().to_string(), value);
            }
        }
        Ok(())
    }
}
