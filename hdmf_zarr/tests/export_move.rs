#![allow(missing_docs)]

use std::error::Error;

use hdmf_zarr::builder::{
    Builder, BuilderArena, BuilderId, CompressorSelection, DatasetBuilder, ElementData,
    GroupBuilder, LinkBuilder, LinkTarget, RefValue, Value,
};
use hdmf_zarr::data_type::DataType;
use hdmf_zarr::export::export;
use hdmf_zarr::io::{ResolvedNode, ZarrIO, ZarrIOOptions};
use hdmf_zarr::link::ReferenceRecord;
use hdmf_zarr::spec_cache::TypeMap;
use hdmf_zarr::store::{Mode, ZarrStore};
use hdmf_zarr::ZarrError;

fn add_dataset(
    arena: &mut BuilderArena,
    parent: BuilderId,
    dataset: DatasetBuilder,
) -> BuilderId {
    let name = dataset.name.clone();
    let id = arena.insert_dataset(dataset);
    match arena.get_mut(parent) {
        Builder::Group(group) => {
            group.datasets.insert(name, id);
        }
        _ => unreachable!(),
    }
    id
}

fn add_link(arena: &mut BuilderArena, parent: BuilderId, link: LinkBuilder) {
    let name = link.name.clone();
    let id = arena.insert_link(link);
    match arena.get_mut(parent) {
        Builder::Group(group) => {
            group.links.insert(name, id);
        }
        _ => unreachable!(),
    }
}

fn open_directory_io(path: &std::path::Path, mode: Mode) -> Result<ZarrIO, ZarrError> {
    Ok(ZarrIO::open(
        ZarrStore::open_directory(path, mode)?,
        TypeMap::new(),
        ZarrIOOptions::new(),
    ))
}

/// A file holding dataset `A` chunked `(4, 4)` and a root link to `/A`.
fn write_source(path: &std::path::Path) -> Result<(), Box<dyn Error>> {
    let mut arena = BuilderArena::new();
    let root = arena.insert_group(GroupBuilder::new(""));
    let mut dataset = DatasetBuilder::new(
        "A",
        DataType::Int32,
        Value::Array {
            data: ElementData::Int32((0..64).collect()),
            shape: vec![8, 8],
        },
    );
    dataset.data_io.chunks = Some(vec![4, 4]);
    dataset.data_io.compressor = CompressorSelection::Gzip(5);
    let a = add_dataset(&mut arena, root, dataset);
    add_link(&mut arena, root, LinkBuilder::soft("alias", a));

    let io = open_directory_io(path, Mode::Create)?;
    io.write(&mut arena, root)?;
    io.close();
    Ok(())
}

#[test]
fn s5_export_preserves_chunks_and_links() -> Result<(), Box<dyn Error>> {
    let dir = tempfile::TempDir::new()?;
    let src_path = dir.path().join("src.zarr");
    let dst_path = dir.path().join("dst.zarr");
    write_source(&src_path)?;

    let src = open_directory_io(&src_path, Mode::Read)?;
    let dst = open_directory_io(&dst_path, Mode::Create)?;
    export(&src, &dst)?;
    src.close();
    dst.close();

    let dst = open_directory_io(&dst_path, Mode::Read)?;
    let (tree, root) = dst.read()?;
    let group = tree.group(root).unwrap();

    let a = tree.dataset(group.datasets["A"]).unwrap();
    assert_eq!(a.data_io.chunks, Some(vec![4, 4]));
    assert_eq!(a.data_io.compressor, CompressorSelection::Gzip(5));
    let (data, shape) = match &a.value {
        Value::Lazy(handle) => handle.read_array()?,
        other => panic!("unexpected value {other:?}"),
    };
    assert_eq!(shape, vec![8, 8]);
    assert_eq!(data, ElementData::Int32((0..64).collect()));

    match tree.get(group.links["alias"]) {
        Builder::Link(link) => match &link.target {
            LinkTarget::External { source, path, .. } => {
                assert_eq!(source, ".");
                assert_eq!(path, "/A");
            }
            other => panic!("unexpected link target {other:?}"),
        },
        _ => unreachable!(),
    }
    Ok(())
}

#[test]
fn export_fidelity_round_trip() -> Result<(), Box<dyn Error>> {
    let dir = tempfile::TempDir::new()?;
    let src_path = dir.path().join("src.zarr");
    let dst_path = dir.path().join("dst.zarr");
    write_source(&src_path)?;

    let src = open_directory_io(&src_path, Mode::Read)?;
    let dst = open_directory_io(&dst_path, Mode::Create)?;
    export(&src, &dst)?;

    // The exported tree reads back identical to the source tree.
    let src = open_directory_io(&src_path, Mode::Read)?;
    let dst = open_directory_io(&dst_path, Mode::Read)?;
    let (src_tree, src_root) = src.read()?;
    let (dst_tree, dst_root) = dst.read()?;
    let src_group = src_tree.group(src_root).unwrap();
    let dst_group = dst_tree.group(dst_root).unwrap();
    assert_eq!(
        src_group.subgroups.keys().collect::<Vec<_>>(),
        dst_group.subgroups.keys().collect::<Vec<_>>()
    );
    assert_eq!(
        src_group.datasets.keys().collect::<Vec<_>>(),
        dst_group.datasets.keys().collect::<Vec<_>>()
    );
    assert_eq!(src_group.attributes, dst_group.attributes);
    Ok(())
}

#[test]
fn s6_file_move_keeps_links_resolving() -> Result<(), Box<dyn Error>> {
    let dir = tempfile::TempDir::new()?;
    let original = dir.path().join("original.zarr");
    write_source(&original)?;

    let moved = dir.path().join("moved.zarr");
    std::fs::rename(&original, &moved)?;

    let io = open_directory_io(&moved, Mode::Read)?;
    let (tree, root) = io.read()?;
    let group = tree.group(root).unwrap();
    match tree.get(group.links["alias"]) {
        Builder::Link(link) => match &link.target {
            LinkTarget::External { source, path, .. } => {
                let record = ReferenceRecord {
                    source: source.clone(),
                    path: path.clone(),
                    ..ReferenceRecord::default()
                };
                match io.resolve_reference(&record)? {
                    ResolvedNode::Dataset(handle) => {
                        assert_eq!(handle.shape(), &[8, 8]);
                    }
                    ResolvedNode::Group { .. } => panic!("/A is a dataset"),
                }
            }
            other => panic!("unexpected link target {other:?}"),
        },
        _ => unreachable!(),
    }
    Ok(())
}

#[test]
fn moved_together_external_references_resolve() -> Result<(), Box<dyn Error>> {
    let dir = tempfile::TempDir::new()?;
    let site = dir.path().join("site");
    std::fs::create_dir(&site)?;

    // File B holds the data; file A references into B.
    let b_path = site.join("b.zarr");
    write_source(&b_path)?;

    let a_path = site.join("a.zarr");
    let mut arena = BuilderArena::new();
    let root = arena.insert_group(GroupBuilder::new(""));
    add_dataset(
        &mut arena,
        root,
        DatasetBuilder::new(
            "remote_refs",
            DataType::ObjectReference,
            Value::References(vec![RefValue::Record(ReferenceRecord {
                source: "../b.zarr".to_string(),
                path: "/A".to_string(),
                ..ReferenceRecord::default()
            })]),
        ),
    );
    let io = open_directory_io(&a_path, Mode::Create)?;
    io.write(&mut arena, root)?;
    io.close();

    // Move the whole directory; the relative source keeps working.
    let moved = dir.path().join("moved-site");
    std::fs::rename(&site, &moved)?;

    let io = open_directory_io(&moved.join("a.zarr"), Mode::Read)?;
    let (tree, root) = io.read()?;
    let refs = tree.group(root).unwrap().datasets["remote_refs"];
    let records = match &tree.dataset(refs).unwrap().value {
        Value::Lazy(handle) => handle.read_references()?,
        other => panic!("unexpected value {other:?}"),
    };
    assert_eq!(records.len(), 1);
    match io.resolve_reference(&records[0])? {
        ResolvedNode::Dataset(handle) => assert_eq!(handle.shape(), &[8, 8]),
        ResolvedNode::Group { .. } => panic!("/A is a dataset"),
    }
    Ok(())
}

#[test]
fn missing_external_reference_is_unavailable() -> Result<(), Box<dyn Error>> {
    let dir = tempfile::TempDir::new()?;
    let a_path = dir.path().join("a.zarr");
    let mut arena = BuilderArena::new();
    let root = arena.insert_group(GroupBuilder::new(""));
    add_dataset(
        &mut arena,
        root,
        DatasetBuilder::new(
            "dangling",
            DataType::ObjectReference,
            Value::References(vec![RefValue::Record(ReferenceRecord {
                source: "../gone.zarr".to_string(),
                path: "/x".to_string(),
                ..ReferenceRecord::default()
            })]),
        ),
    );
    let io = open_directory_io(&a_path, Mode::Create)?;
    io.write(&mut arena, root)?;
    io.close();

    // The file remains readable; only dereferencing the record fails.
    let io = open_directory_io(&a_path, Mode::Read)?;
    let (tree, root) = io.read()?;
    let dangling = tree.group(root).unwrap().datasets["dangling"];
    let records = match &tree.dataset(dangling).unwrap().value {
        Value::Lazy(handle) => handle.read_references()?,
        other => panic!("unexpected value {other:?}"),
    };
    let err = io.resolve_reference(&records[0]).unwrap_err();
    assert!(matches!(err, ZarrError::ExternalUnavailable { .. }));
    Ok(())
}

#[test]
fn broken_same_file_link_raises_on_dereference() -> Result<(), Box<dyn Error>> {
    let dir = tempfile::TempDir::new()?;
    let a_path = dir.path().join("a.zarr");
    write_source(&a_path)?;

    let io = open_directory_io(&a_path, Mode::Read)?;
    let record = ReferenceRecord::same_file("/no/such/node");
    assert!(matches!(
        io.resolve_reference(&record).unwrap_err(),
        ZarrError::BrokenLink(_)
    ));
    Ok(())
}
