//! The export coordinator.
//!
//! Export rewrites a source file into a destination store, preserving
//! structure, dtypes, chunking, compression hints, and links/references. The
//! source is anything that can present itself as a read-only builder tree
//! via [`HierarchyReader`]: this backend, or a foreign hierarchical backend
//! with its own reader implementation.
//!
//! Link and reference `source` fields are remapped for the destination:
//! records that pointed within the exported file stay same-file; records that
//! pointed at other files are re-relativized against the destination root so
//! moved-together file sets keep resolving.

use crate::{
    attribute::AttributeValue,
    builder::{Builder, BuilderArena, BuilderId, LinkTarget, RefValue, ScalarValue, Value},
    error::ZarrError,
    io::ZarrIO,
    link::{relative_source, resolve_source, ReferenceRecord},
};

/// A read-only view of a hierarchical file as a builder tree.
pub trait HierarchyReader {
    /// The source file's stable path, used to resolve its relative sources.
    fn reader_source_path(&self) -> String;

    /// Read the file into a builder arena (dataset values may be lazy).
    ///
    /// # Errors
    /// Returns [`ZarrError`] on storage or metadata errors.
    fn read_tree(&self) -> Result<(BuilderArena, BuilderId), ZarrError>;
}

impl HierarchyReader for ZarrIO {
    fn reader_source_path(&self) -> String {
        self.source_path().to_string()
    }

    fn read_tree(&self) -> Result<(BuilderArena, BuilderId), ZarrError> {
        self.read()
    }
}

/// Export `src` into `dst`.
///
/// Datasets inherit chunk shape and compressor from the source where the
/// read side could express them; links and references are remapped as
/// described at the module level. On error the destination may be incomplete
/// and must be discarded.
///
/// # Errors
/// Returns [`ZarrError`] on read, remap, or write failure.
pub fn export(src: &dyn HierarchyReader, dst: &ZarrIO) -> Result<(), ZarrError> {
    let (mut arena, root) = src.read_tree()?;
    let src_root = src.reader_source_path();
    let dst_root = dst.source_path().to_string();
    remap_arena(&mut arena, &src_root, &dst_root)?;
    dst.write(&mut arena, root)
}

fn remap_arena(
    arena: &mut BuilderArena,
    src_root: &str,
    dst_root: &str,
) -> Result<(), ZarrError> {
    for index in 0..arena.len() {
        let id = BuilderId(index);
        match arena.get_mut(id) {
            Builder::Group(group) => {
                for value in group.attributes.values_mut() {
                    remap_attribute(value, src_root, dst_root);
                }
            }
            Builder::Dataset(dataset) => {
                for value in dataset.attributes.values_mut() {
                    remap_attribute(value, src_root, dst_root);
                }
                // Reference-bearing lazy values must be materialized so their
                // records can be rewritten before the destination write.
                let needs_data = match &dataset.value {
                    Value::Lazy(handle) => {
                        let data_type = handle.data_type();
                        data_type.is_reference()
                            || matches!(
                                data_type,
                                crate::data_type::DataType::Compound(fields)
                                    if fields.iter().any(|f| f.data_type.is_reference())
                            )
                    }
                    _ => false,
                };
                if needs_data {
                    let Value::Lazy(handle) = &dataset.value else {
                        unreachable!()
                    };
                    dataset.value = handle.read_value()?;
                }
                remap_value(&mut dataset.value, src_root, dst_root);
            }
            Builder::Link(link) => {
                if let LinkTarget::External { source, .. } = &mut link.target {
                    remap_source(source, src_root, dst_root);
                }
            }
        }
    }
    Ok(())
}

fn remap_value(value: &mut Value, src_root: &str, dst_root: &str) {
    match value {
        Value::Scalar(scalar) => remap_scalar(scalar, src_root, dst_root),
        Value::References(refs) => {
            for reference in refs {
                remap_ref(reference, src_root, dst_root);
            }
        }
        Value::Compound { rows, .. } => {
            for row in rows {
                for scalar in row {
                    remap_scalar(scalar, src_root, dst_root);
                }
            }
        }
        Value::Array { .. } | Value::Iterator(_) | Value::Lazy(_) => {}
    }
}

fn remap_scalar(scalar: &mut ScalarValue, src_root: &str, dst_root: &str) {
    if let ScalarValue::Ref(reference) = scalar {
        remap_ref(reference, src_root, dst_root);
    }
}

fn remap_attribute(value: &mut AttributeValue, src_root: &str, dst_root: &str) {
    match value {
        AttributeValue::Reference(reference) => remap_ref(reference, src_root, dst_root),
        AttributeValue::List(values) => {
            for value in values {
                remap_attribute(value, src_root, dst_root);
            }
        }
        AttributeValue::Map(map) => {
            for value in map.values_mut() {
                remap_attribute(value, src_root, dst_root);
            }
        }
        _ => {}
    }
}

fn remap_ref(reference: &mut RefValue, src_root: &str, dst_root: &str) {
    if let RefValue::Record(record) = reference {
        remap_record(record, src_root, dst_root);
    }
}

/// Rewrite a link builder's `source` for the destination file.
fn remap_source(source: &mut String, src_root: &str, dst_root: &str) {
    if source == crate::link::SAME_FILE {
        return;
    }
    let target_root = resolve_source(src_root, source);
    *source = relative_source(dst_root, &target_root);
}

/// Rewrite a record's `source` for the destination file.
///
/// Same-file records stay same-file: their target is part of the export.
/// External records are resolved against the source root and re-relativized
/// against the destination root; an external record that resolves to the
/// destination itself becomes a same-file record.
fn remap_record(record: &mut ReferenceRecord, src_root: &str, dst_root: &str) {
    if record.is_same_file() {
        return;
    }
    let target_root = resolve_source(src_root, &record.source);
    record.source = relative_source(dst_root, &target_root);
}
