use crate::error::MigResult;
use crate::metadata::model::TableMeta;

/// Maps source-side table metadata to its destination-side shape.
///
/// The default implementation re-homes the table under the destination
/// catalog/object names and keeps the schema as-is. Connector crates plug in
/// dialect-aware transforms (type mapping, name mangling) without the
/// orchestrator knowing about either dialect.
pub trait SchemaTransform {
    fn transform(
        &self,
        source: &TableMeta,
        dest_catalog: &str,
        dest_object: &str,
    ) -> MigResult<TableMeta>;
}

/// Identity transform that only re-homes the table at the destination.
#[derive(Debug, Clone, Copy, Default)]
pub struct RenameTransform;

impl SchemaTransform for RenameTransform {
    fn transform(
        &self,
        source: &TableMeta,
        dest_catalog: &str,
        dest_object: &str,
    ) -> MigResult<TableMeta> {
        let mut dest = source.clone();
        dest.catalog = dest_catalog.to_string();
        dest.name = dest_object.to_string();
        dest.location = None;
        Ok(dest)
    }
}

/// Derives the staging object a data-transfer task loads into before committing
/// to the destination.
///
/// The staging name embeds the owning job id and the group ordinal so that
/// concurrent transfer tasks of one job never collide, and so a resumed run
/// regenerates the same names.
pub fn staging_meta(dest: &TableMeta, job_id: &str, group_ordinal: usize) -> TableMeta {
    let mut staging = dest.clone();
    staging.name = format!("{}__stage_{}_{}", dest.name, job_id, group_ordinal);
    staging
}
