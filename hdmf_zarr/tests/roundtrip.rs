#![allow(missing_docs)]

use std::error::Error;

use hdmf_zarr::attribute::AttributeValue;
use hdmf_zarr::builder::{
    Builder, BuilderArena, BuilderId, DatasetBuilder, ElementData, GroupBuilder, LinkBuilder,
    RefValue, ScalarValue, Value,
};
use hdmf_zarr::data_type::{CompoundField, DataType};
use hdmf_zarr::io::{ResolvedNode, ZarrIO, ZarrIOOptions};
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

fn add_subgroup(arena: &mut BuilderArena, parent: BuilderId, group: GroupBuilder) -> BuilderId {
    let name = group.name.clone();
    let id = arena.insert_group(group);
    match arena.get_mut(parent) {
        Builder::Group(parent) => {
            parent.subgroups.insert(name, id);
        }
        _ => unreachable!(),
    }
    id
}

fn add_link(arena: &mut BuilderArena, parent: BuilderId, link: LinkBuilder) -> BuilderId {
    let name = link.name.clone();
    let id = arena.insert_link(link);
    match arena.get_mut(parent) {
        Builder::Group(group) => {
            group.links.insert(name, id);
        }
        _ => unreachable!(),
    }
    id
}

/// The S1 tree: root attributes `{"doc": "top"}`, subgroup `g1` with
/// attribute `{"n": 3}`, dataset `g1/d1` of dtype int32, shape [2, 2],
/// value [[1, 2], [3, 4]].
fn s1_tree() -> (BuilderArena, BuilderId, BuilderId, BuilderId) {
    let mut arena = BuilderArena::new();
    let mut root_group = GroupBuilder::new("");
    root_group.set_attribute("doc", "top");
    root_group.set_attribute("object_id", "root-id");
    let root = arena.insert_group(root_group);

    let mut g1 = GroupBuilder::new("g1");
    g1.set_attribute("n", 3i64);
    let g1 = add_subgroup(&mut arena, root, g1);

    let d1 = add_dataset(
        &mut arena,
        g1,
        DatasetBuilder::new(
            "d1",
            DataType::Int32,
            Value::Array {
                data: ElementData::Int32(vec![1, 2, 3, 4]),
                shape: vec![2, 2],
            },
        ),
    );
    (arena, root, g1, d1)
}

fn open_memory_io() -> ZarrIO {
    ZarrIO::open(
        ZarrStore::open_memory("mem://test.zarr"),
        TypeMap::new(),
        ZarrIOOptions::new(),
    )
}

fn read_dataset_array(arena: &BuilderArena, id: BuilderId) -> (ElementData, Vec<u64>) {
    match &arena.dataset(id).unwrap().value {
        Value::Lazy(handle) => handle.read_array().unwrap(),
        other => panic!("expected lazy dataset value, got {other:?}"),
    }
}

#[test]
fn s1_basic_write_read() -> Result<(), Box<dyn Error>> {
    let (mut arena, root, _, _) = s1_tree();
    let io = open_memory_io();
    io.write(&mut arena, root)?;

    let (tree, root) = io.read()?;
    let root_group = tree.group(root).unwrap();
    assert_eq!(
        root_group.attributes.get("doc"),
        Some(&AttributeValue::Str("top".to_string()))
    );
    let g1 = tree.group(root_group.subgroups["g1"]).unwrap();
    assert_eq!(g1.attributes.get("n"), Some(&AttributeValue::Int(3)));

    let (data, shape) = read_dataset_array(&tree, g1.datasets["d1"]);
    assert_eq!(shape, vec![2, 2]);
    assert_eq!(data, ElementData::Int32(vec![1, 2, 3, 4]));
    Ok(())
}

#[test]
fn s2_soft_link() -> Result<(), Box<dyn Error>> {
    let dir = tempfile::TempDir::new()?;
    let file = dir.path().join("test.zarr");
    let (mut arena, root, _, d1) = s1_tree();
    add_link(&mut arena, root, LinkBuilder::soft("alias", d1));

    let store = ZarrStore::open_directory(&file, Mode::Create)?;
    let io = ZarrIO::open(store, TypeMap::new(), ZarrIOOptions::new());
    io.write(&mut arena, root)?;
    io.close();

    // The stored link record grammar is part of the interchange contract.
    let attrs: serde_json::Value =
        serde_json::from_slice(&std::fs::read(file.join(".zattrs"))?)?;
    assert_eq!(
        attrs["zarr_link"],
        serde_json::json!([{
            "name": "alias",
            "source": ".",
            "path": "/g1/d1",
            "object_id": null,
            "source_object_id": "root-id",
        }])
    );

    // Reading `alias` resolves to the same dataset as /g1/d1.
    let store = ZarrStore::open_directory(&file, Mode::Read)?;
    let io = ZarrIO::open(store, TypeMap::new(), ZarrIOOptions::new());
    let (tree, root) = io.read()?;
    let root_group = tree.group(root).unwrap();
    match tree.get(root_group.links["alias"]) {
        Builder::Link(link) => match &link.target {
            hdmf_zarr::builder::LinkTarget::External { source, path, .. } => {
                assert_eq!(source, ".");
                assert_eq!(path, "/g1/d1");
            }
            other => panic!("unexpected link target {other:?}"),
        },
        _ => unreachable!(),
    }
    let record = hdmf_zarr::link::ReferenceRecord::same_file("/g1/d1");
    match io.resolve_reference(&record)? {
        ResolvedNode::Dataset(handle) => {
            assert_eq!(handle.path().as_str(), "/g1/d1");
            let (data, _) = handle.read_array()?;
            assert_eq!(data, ElementData::Int32(vec![1, 2, 3, 4]));
        }
        ResolvedNode::Group { .. } => panic!("alias must resolve to a dataset"),
    }
    Ok(())
}

#[test]
fn s3_object_references_resolve_lazily() -> Result<(), Box<dyn Error>> {
    let (mut arena, root, g1, d1) = s1_tree();
    add_dataset(
        &mut arena,
        root,
        DatasetBuilder::new(
            "refs",
            DataType::ObjectReference,
            Value::References(vec![RefValue::Builder(g1), RefValue::Builder(d1)]),
        ),
    );
    let io = open_memory_io();
    io.write(&mut arena, root)?;

    let (tree, root) = io.read()?;
    let refs_id = tree.group(root).unwrap().datasets["refs"];
    let refs = tree.dataset(refs_id).unwrap();
    assert_eq!(refs.data_type, DataType::ObjectReference);
    // Before access the value is still a lazy handle: no chunk has been read.
    let handle = match &refs.value {
        Value::Lazy(handle) => handle.clone(),
        other => panic!("expected lazy value, got {other:?}"),
    };

    let records = handle.read_references()?;
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].path, "/g1");
    assert_eq!(records[0].source, ".");
    assert_eq!(records[1].path, "/g1/d1");

    // Dereferencing the first element materializes g1.
    match io.resolve_reference(&records[0])? {
        ResolvedNode::Group { path, .. } => assert_eq!(path.as_str(), "/g1"),
        ResolvedNode::Dataset(_) => panic!("/g1 is a group"),
    }
    match io.resolve_reference(&records[1])? {
        ResolvedNode::Dataset(handle) => {
            let (data, _) = handle.read_array()?;
            assert_eq!(data, ElementData::Int32(vec![1, 2, 3, 4]));
        }
        ResolvedNode::Group { .. } => panic!("/g1/d1 is a dataset"),
    }
    Ok(())
}

#[test]
fn scalar_and_text_round_trip() -> Result<(), Box<dyn Error>> {
    let mut arena = BuilderArena::new();
    let root = arena.insert_group(GroupBuilder::new(""));
    add_dataset(
        &mut arena,
        root,
        DatasetBuilder::new(
            "count",
            DataType::Int64,
            Value::Scalar(ScalarValue::Int(42)),
        ),
    );
    add_dataset(
        &mut arena,
        root,
        DatasetBuilder::new(
            "names",
            DataType::Utf8,
            Value::Array {
                data: ElementData::Str(vec![
                    "alpha".to_string(),
                    "emoji \u{1F600}".to_string(),
                    String::new(),
                ]),
                shape: vec![3],
            },
        ),
    );
    add_dataset(
        &mut arena,
        root,
        DatasetBuilder::new(
            "stamp",
            DataType::IsoDatetime,
            Value::Scalar(ScalarValue::Str("2024-05-04T12:00:00Z".to_string())),
        ),
    );

    let io = open_memory_io();
    io.write(&mut arena, root)?;
    let (tree, root) = io.read()?;
    let group = tree.group(root).unwrap();

    let count = tree.dataset(group.datasets["count"]).unwrap();
    assert_eq!(count.data_type, DataType::Int64);
    match &count.value {
        Value::Lazy(handle) => {
            assert!(handle.is_scalar());
            assert_eq!(handle.read_scalar()?, ScalarValue::Int(42));
        }
        other => panic!("unexpected value {other:?}"),
    }

    let names = tree.dataset(group.datasets["names"]).unwrap();
    assert_eq!(names.data_type, DataType::Utf8);
    let (data, shape) = read_dataset_array(&tree, group.datasets["names"]);
    assert_eq!(shape, vec![3]);
    assert_eq!(
        data,
        ElementData::Str(vec![
            "alpha".to_string(),
            "emoji \u{1F600}".to_string(),
            String::new(),
        ])
    );

    // Scalar text widens to UTF-8 on read (the `scalar` marker replaces the
    // text-kind hint); the value itself is preserved.
    let stamp = tree.dataset(group.datasets["stamp"]).unwrap();
    assert_eq!(stamp.data_type, DataType::Utf8);
    match &stamp.value {
        Value::Lazy(handle) => assert_eq!(
            handle.read_scalar()?,
            ScalarValue::Str("2024-05-04T12:00:00Z".to_string())
        ),
        other => panic!("unexpected value {other:?}"),
    }
    Ok(())
}

#[test]
fn compound_with_reference_field_round_trips() -> Result<(), Box<dyn Error>> {
    let (mut arena, root, g1, _) = s1_tree();
    let fields = vec![
        CompoundField {
            name: "id".to_string(),
            data_type: DataType::Int32,
        },
        CompoundField {
            name: "target".to_string(),
            data_type: DataType::ObjectReference,
        },
    ];
    add_dataset(
        &mut arena,
        root,
        DatasetBuilder::new(
            "table",
            DataType::Compound(fields.clone()),
            Value::Compound {
                fields,
                rows: vec![
                    vec![
                        ScalarValue::Int(1),
                        ScalarValue::Ref(RefValue::Builder(g1)),
                    ],
                    vec![
                        ScalarValue::Int(2),
                        ScalarValue::Ref(RefValue::Builder(g1)),
                    ],
                ],
            },
        ),
    );

    let io = open_memory_io();
    io.write(&mut arena, root)?;
    let (tree, root) = io.read()?;
    let table_id = tree.group(root).unwrap().datasets["table"];
    let table = tree.dataset(table_id).unwrap();
    let rows = match &table.value {
        Value::Lazy(handle) => handle.read_rows()?,
        other => panic!("unexpected value {other:?}"),
    };
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0][0], ScalarValue::Int(1));
    match &rows[1][1] {
        ScalarValue::Ref(RefValue::Record(record)) => {
            assert_eq!(record.path, "/g1");
            assert_eq!(record.source, ".");
        }
        other => panic!("unexpected field {other:?}"),
    }
    Ok(())
}

#[test]
fn fixed_compound_round_trips() -> Result<(), Box<dyn Error>> {
    let mut arena = BuilderArena::new();
    let root = arena.insert_group(GroupBuilder::new(""));
    let fields = vec![
        CompoundField {
            name: "x".to_string(),
            data_type: DataType::Float64,
        },
        CompoundField {
            name: "n".to_string(),
            data_type: DataType::Int16,
        },
    ];
    add_dataset(
        &mut arena,
        root,
        DatasetBuilder::new(
            "points",
            DataType::Compound(fields.clone()),
            Value::Compound {
                fields,
                rows: vec![
                    vec![ScalarValue::Float(0.5), ScalarValue::Int(-3)],
                    vec![ScalarValue::Float(2.25), ScalarValue::Int(7)],
                ],
            },
        ),
    );
    let io = open_memory_io();
    io.write(&mut arena, root)?;
    let (tree, root) = io.read()?;
    let points = tree.group(root).unwrap().datasets["points"];
    let rows = match &tree.dataset(points).unwrap().value {
        Value::Lazy(handle) => handle.read_rows()?,
        other => panic!("unexpected value {other:?}"),
    };
    assert_eq!(
        rows,
        vec![
            vec![ScalarValue::Float(0.5), ScalarValue::Int(-3)],
            vec![ScalarValue::Float(2.25), ScalarValue::Int(7)],
        ]
    );
    Ok(())
}

#[test]
fn reference_attribute_round_trips() -> Result<(), Box<dyn Error>> {
    let (mut arena, root, g1, _) = s1_tree();
    match arena.get_mut(root) {
        Builder::Group(group) => {
            group.attributes.insert(
                "favorite".to_string(),
                AttributeValue::Reference(RefValue::Builder(g1)),
            );
        }
        _ => unreachable!(),
    }
    let io = open_memory_io();
    io.write(&mut arena, root)?;
    let (tree, root) = io.read()?;
    match tree.group(root).unwrap().attributes.get("favorite") {
        Some(AttributeValue::Reference(RefValue::Record(record))) => {
            assert_eq!(record.path, "/g1");
            assert_eq!(record.source, ".");
        }
        other => panic!("unexpected attribute {other:?}"),
    }
    Ok(())
}

#[test]
fn reserved_attribute_names_are_rejected() {
    for name in ["zarr_link", "zarr_dtype", ".specloc"] {
        let (mut arena, root, _, _) = s1_tree();
        match arena.get_mut(root) {
            Builder::Group(group) => {
                group
                    .attributes
                    .insert(name.to_string(), AttributeValue::Int(1));
            }
            _ => unreachable!(),
        }
        let io = open_memory_io();
        let err = io.write(&mut arena, root).unwrap_err();
        assert!(
            matches!(err, ZarrError::Unsupported(_)),
            "{name}: {err}"
        );
    }
}

#[test]
fn region_reference_writes_fail() {
    let mut arena = BuilderArena::new();
    let root = arena.insert_group(GroupBuilder::new(""));
    add_dataset(
        &mut arena,
        root,
        DatasetBuilder::new(
            "region",
            DataType::RegionReference,
            Value::References(vec![]),
        ),
    );
    let io = open_memory_io();
    assert!(matches!(
        io.write(&mut arena, root),
        Err(ZarrError::RegionReferenceUnsupported(_))
    ));
}

#[test]
fn schema_cache_round_trips_through_file() -> Result<(), Box<dyn Error>> {
    let dir = tempfile::TempDir::new()?;
    let file = dir.path().join("cached.zarr");
    let (mut arena, root, _, _) = s1_tree();

    let mut type_map = TypeMap::new();
    type_map.insert_source(
        "core",
        "2.6.0",
        "namespace",
        serde_json::json!({"namespaces": [{"name": "core", "version": "2.6.0"}]}),
    );
    let store = ZarrStore::open_directory(&file, Mode::Create)?;
    let io = ZarrIO::open(store, type_map.clone(), ZarrIOOptions::new());
    io.write(&mut arena, root)?;
    io.close();

    // A fresh handle with an empty type map hydrates from the cache alone.
    let store = ZarrStore::open_directory(&file, Mode::Read)?;
    let io = ZarrIO::open(store, TypeMap::new(), ZarrIOOptions::new());
    let (tree, root) = io.read()?;
    assert_eq!(io.type_map(), type_map);
    // The schema-cache subtree does not surface in the builder tree.
    assert!(!tree
        .group(root)
        .unwrap()
        .subgroups
        .contains_key("specifications"));
    Ok(())
}

#[test]
fn consolidated_metadata_matches_fresh_index() -> Result<(), Box<dyn Error>> {
    let (mut arena, root, _, _) = s1_tree();
    let io = open_memory_io();
    io.write(&mut arena, root)?;

    let written = io.store().read_consolidated()?.expect("index written");
    io.store().consolidate()?;
    let fresh = io.store().read_consolidated()?.unwrap();
    assert_eq!(written, fresh);
    assert!(written.metadata.contains_key("g1/.zgroup"));
    assert!(written.metadata.contains_key("g1/d1/.zarray"));
    Ok(())
}

#[test]
fn idempotent_append_is_a_no_op() -> Result<(), Box<dyn Error>> {
    let dir = tempfile::TempDir::new()?;
    let file = dir.path().join("append.zarr");

    let (mut arena, root, _, _) = s1_tree();
    let store = ZarrStore::open_directory(&file, Mode::Create)?;
    let io = ZarrIO::open(store, TypeMap::new(), ZarrIOOptions::new());
    io.write(&mut arena, root)?;
    io.close();

    let before: serde_json::Value =
        serde_json::from_slice(&std::fs::read(file.join("g1/.zattrs"))?)?;

    let (mut arena, root, _, _) = s1_tree();
    let store = ZarrStore::open_directory(&file, Mode::Append)?;
    let io = ZarrIO::open(store, TypeMap::new(), ZarrIOOptions::new());
    io.write(&mut arena, root)?;
    io.close();

    let after: serde_json::Value =
        serde_json::from_slice(&std::fs::read(file.join("g1/.zattrs"))?)?;
    assert_eq!(before, after);
    Ok(())
}

#[test]
fn append_with_divergent_attribute_conflicts() -> Result<(), Box<dyn Error>> {
    let dir = tempfile::TempDir::new()?;
    let file = dir.path().join("conflict.zarr");

    let (mut arena, root, _, _) = s1_tree();
    let store = ZarrStore::open_directory(&file, Mode::Create)?;
    let io = ZarrIO::open(store, TypeMap::new(), ZarrIOOptions::new());
    io.write(&mut arena, root)?;
    io.close();

    let (mut arena, root, g1, _) = s1_tree();
    match arena.get_mut(g1) {
        Builder::Group(group) => {
            group.set_attribute("n", 4i64);
        }
        _ => unreachable!(),
    }
    let store = ZarrStore::open_directory(&file, Mode::Append)?;
    let io = ZarrIO::open(store, TypeMap::new(), ZarrIOOptions::new());
    let err = io.write(&mut arena, root).unwrap_err();
    assert!(matches!(err, ZarrError::AttributeConflict { ref name, .. } if name == "n"));
    Ok(())
}

#[test]
fn can_read_predicate() -> Result<(), Box<dyn Error>> {
    let store = ZarrStore::open_memory("mem://empty");
    assert!(!ZarrIO::can_read(&store));

    let (mut arena, root, _, _) = s1_tree();
    let io = open_memory_io();
    io.write(&mut arena, root)?;
    assert!(ZarrIO::can_read(io.store()));
    Ok(())
}
