//! Primitive Field Types
//!
//! Field types are plain strings in a model definition. A type is either one of
//! the primitive names below or the name of another model, in which case the
//! field is a relationship and the association resolver decides its semantics.

/// Auto-increment integer identity
pub const COUNTER: &str = "Counter";
pub const INTEGER: &str = "Integer";
pub const TEXT: &str = "Text";
pub const GUID: &str = "Guid";
pub const DATE_TIME: &str = "DateTime";

/// Every primitive type name understood by the core
pub const PRIMITIVE_TYPES: [&str; 18] = [
    "Counter", "Integer", "Short", "Number", "Float", "Decimal", "Boolean", "Text", "Note",
    "Email", "URL", "Guid", "Date", "DateTime", "Time", "Duration", "Json", "Object",
];

/// Check whether a type name is primitive (not a model reference)
pub fn is_primitive(type_name: &str) -> bool {
    PRIMITIVE_TYPES.contains(&type_name)
}

/// Check whether values of this type are generated by the database on insert
pub fn is_auto_increment(type_name: &str) -> bool {
    type_name == COUNTER
}

/// Type used for a column that stores a key of the given type
///
/// A `Counter` primary key is referenced through a plain `Integer` column;
/// every other key type is referenced as is.
pub fn key_reference_type(type_name: &str) -> &str {
    if is_auto_increment(type_name) {
        INTEGER
    } else {
        type_name
    }
}

/// Capitalize the first character of an identifier (`skills` → `Skills`)
pub fn capitalize(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_primitive_detection() {
        assert!(is_primitive("Text"));
        assert!(is_primitive("Counter"));
        assert!(!is_primitive("Person"));
        assert!(!is_primitive("text"));
    }

    #[test]
    fn test_key_reference_type() {
        assert_eq!(key_reference_type("Counter"), "Integer");
        assert_eq!(key_reference_type("Guid"), "Guid");
        assert_eq!(key_reference_type("Text"), "Text");
    }

    #[test]
    fn test_capitalize() {
        assert_eq!(capitalize("skills"), "Skills");
        assert_eq!(capitalize("Orders"), "Orders");
        assert_eq!(capitalize(""), "");
    }
}
