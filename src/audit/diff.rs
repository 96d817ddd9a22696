use serde::Serialize;
use serde_json::Value;

/// Bookkeeping fields never reported as changed.
pub const IGNORED_FIELDS: &[&str] = &[
    "createTime",
    "updateTime",
    "version",
    "isDeleted",
    "create_time",
    "update_time",
    "created_at",
    "updated_at",
    "is_deleted",
];

/// Names of the top-level fields of `after` whose value differs from `before`.
///
/// Comparison is shallow: nested objects and arrays are compared by value.
/// Fields only present in `after` count as changed, fields missing from
/// `after` are not reported. The result is ordered by field name. Returns an
/// empty list when either side is absent or not an object.
pub fn diff_fields(before: Option<&Value>, after: Option<&Value>) -> Vec<String> {
    let (Some(before), Some(after)) = (before, after) else {
        return Vec::new();
    };

    let (Some(before), Some(after)) = (before.as_object(), after.as_object()) else {
        tracing::warn!("Snapshot diff skipped: both snapshots must be JSON objects");
        return Vec::new();
    };

    let mut changed: Vec<String> = after
        .iter()
        .filter(|(field, _)| !IGNORED_FIELDS.contains(&field.as_str()))
        .filter(|(field, value)| before.get(field.as_str()) != Some(*value))
        .map(|(field, _)| field.clone())
        .collect();
    changed.sort();
    changed
}

/// Like [`diff_fields`], for any serializable snapshot types.
pub fn diff_snapshots<B, A>(before: &B, after: &A) -> Vec<String>
where
    B: Serialize + ?Sized,
    A: Serialize + ?Sized,
{
    let before = match serde_json::to_value(before) {
        Ok(v) => v,
        Err(e) => {
            tracing::error!("Failed to convert before snapshot for diff: {e}");
            return Vec::new();
        }
    };
    let after = match serde_json::to_value(after) {
        Ok(v) => v,
        Err(e) => {
            tracing::error!("Failed to convert after snapshot for diff: {e}");
            return Vec::new();
        }
    };
    diff_fields(Some(&before), Some(&after))
}
