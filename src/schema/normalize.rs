//! Canonicalization of raw schema documents.
//!
//! `normalize` is a pure function: it never mutates shared state, and
//! normalizing an already-normalized document returns an equal document, so
//! default-action synthesis can never duplicate entries across reloads.

use crate::schema::types::{ActionDocument, ActionScope, ActionType, SchemaDocument};

/// Action keys synthesized from the permission map when not explicit.
const DEFAULT_ACTION_KEYS: [&str; 3] = ["create", "edit", "delete"];

pub fn normalize(mut doc: SchemaDocument) -> SchemaDocument {
    fold_legacy_detail(&mut doc);
    default_filter_operators(&mut doc);
    synthesize_default_actions(&mut doc);
    decorate_actions(&mut doc);
    if doc.title.is_none() {
        doc.title = Some(title_case(&doc.model));
    }
    if doc.singular_title.is_none() {
        doc.singular_title = doc.title.clone();
    }
    doc
}

/// Legacy documents carried a singular `detail` object; the canonical form is
/// a `details` array with that entry first.
fn fold_legacy_detail(doc: &mut SchemaDocument) {
    if let Some(section) = doc.detail.take() {
        if !doc.details.iter().any(|d| d.model == section.model) {
            doc.details.insert(0, section);
        }
    }
}

fn default_filter_operators(doc: &mut SchemaDocument) {
    for field in doc.fields.values_mut() {
        if field.filter.is_none() && field.filterable {
            field.filter = Some(field.type_.default_filter_operators());
        }
    }
}

/// Create/edit/delete actions are derived from the permission map unless the
/// document already declares them or lists them in `suppress_default_actions`.
fn synthesize_default_actions(doc: &mut SchemaDocument) {
    for key in DEFAULT_ACTION_KEYS {
        let permission_action = match key {
            "edit" => "update",
            other => other,
        };
        if !doc.permissions.contains_key(permission_action) {
            continue;
        }
        if doc.suppress_default_actions.iter().any(|k| k == key) {
            continue;
        }
        if doc.actions.iter().any(|a| a.key == key) {
            continue;
        }
        let (type_, scope) = match key {
            "create" => (ActionType::Form, vec![ActionScope::List]),
            "edit" => (ActionType::Form, vec![ActionScope::List, ActionScope::Detail]),
            _ => (ActionType::Delete, vec![ActionScope::List, ActionScope::Detail]),
        };
        doc.actions.push(ActionDocument {
            key: key.to_string(),
            type_,
            scope,
            field: None,
            permission: doc.permissions.get(permission_action).cloned(),
            confirm: (key == "delete").then(|| format!("{}.delete.confirm", doc.model)),
            label: None,
            icon: None,
            style: None,
            modal: None,
        });
    }
}

/// Fill icon/label/style from naming conventions when not explicit.
fn decorate_actions(doc: &mut SchemaDocument) {
    for action in &mut doc.actions {
        if action.icon.is_none() {
            action.icon = Some(default_icon(&action.key, action.type_).to_string());
        }
        if action.label.is_none() {
            action.label = Some(title_case(&action.key));
        }
        if action.style.is_none() {
            let style = if matches!(action.type_, ActionType::Delete) {
                "danger"
            } else {
                "primary"
            };
            action.style = Some(style.to_string());
        }
    }
}

fn default_icon(key: &str, type_: ActionType) -> &'static str {
    match key {
        "create" => "plus",
        "edit" => "pen",
        "delete" => "trash",
        _ => match type_ {
            ActionType::Delete => "trash",
            ActionType::Form => "pen",
            ActionType::Route => "link",
            ActionType::ApiCall => "bolt",
            ActionType::FieldUpdate => "toggle-on",
        },
    }
}

fn title_case(s: &str) -> String {
    s.split('_')
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(c) => c.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
