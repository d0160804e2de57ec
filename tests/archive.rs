use std::{fs::File, io::Write, path::Path};

use dump_pickle::{cli, ErrorKind, Locator, PrettyPrinter, UnpicklerOptions, Value};
use pretty_assertions::assert_eq;
use zip::{write::FileOptions, CompressionMethod, ZipWriter};

const LIST_PICKLE: &[u8] = b"\x80\x02]q\x00(K\x01K\x02e.";
const DICT_PICKLE: &[u8] = b"\x80\x02}q\x00X\x01\x00\x00\x00aq\x01K\x01s.";
const GARBAGE: &[u8] = b"\xff\xff\xff";

fn write_zip(path: &Path, members: &[(&str, &[u8])]) {
    let mut zw = ZipWriter::new(File::create(path).unwrap());
    for (name, data) in members {
        zw.start_file(
            *name,
            FileOptions::default().compression_method(CompressionMethod::Stored),
        )
        .unwrap();
        zw.write_all(data).unwrap();
    }
    zw.finish().unwrap();
}

fn dump_to_string(locator: &str) -> dump_pickle::Result<String> {
    let mut out = Vec::new();
    cli::dump_locator(
        &Locator::parse(locator)?,
        &mut out,
        UnpicklerOptions::default(),
        &PrettyPrinter::default(),
    )?;
    Ok(String::from_utf8(out).unwrap())
}

#[test]
fn exact_member() {
    let dir = tempfile::tempdir().unwrap();
    let zpath = dir.path().join("model.pt");
    write_zip(
        &zpath,
        &[("archive/data.pkl", LIST_PICKLE), ("archive/other.pkl", DICT_PICKLE)],
    );
    let out = dump_to_string(&format!("{}@archive/other.pkl", zpath.display())).unwrap();
    assert_eq!(out, "{'a': 1}\n");
}

#[test]
fn member_name_with_brackets() {
    let dir = tempfile::tempdir().unwrap();
    let zpath = dir.path().join("model.pt");
    write_zip(
        &zpath,
        &[("archive/data0.pkl", LIST_PICKLE), ("archive/data[0].pkl", DICT_PICKLE)],
    );
    let out = dump_to_string(&format!("{}@archive/data[0].pkl", zpath.display())).unwrap();
    assert_eq!(out, "{'a': 1}\n");
}

#[test]
fn missing_member() {
    let dir = tempfile::tempdir().unwrap();
    let zpath = dir.path().join("model.pt");
    write_zip(&zpath, &[("archive/data.pkl", LIST_PICKLE)]);
    let err = dump_to_string(&format!("{}@archive/nope.pkl", zpath.display())).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Locator);
    assert!(err.to_string().contains("archive/nope.pkl"), "{err}");
}

#[test]
fn first_glob_match_wins() {
    let dir = tempfile::tempdir().unwrap();
    let zpath = dir.path().join("model.pt");
    // Archive order, not name order, decides which member is used.
    write_zip(
        &zpath,
        &[
            ("archive/version", &b"3\n"[..]),
            ("archive/b.pkl", LIST_PICKLE),
            ("archive/a.pkl", GARBAGE),
        ],
    );
    let out = dump_to_string(&format!("{}@*.pkl", zpath.display())).unwrap();
    assert_eq!(out, "[1, 2]\n");
}

#[test]
fn no_glob_match() {
    let dir = tempfile::tempdir().unwrap();
    let zpath = dir.path().join("model.pt");
    write_zip(&zpath, &[("archive/data.pkl", LIST_PICKLE)]);
    let err = dump_to_string(&format!("{}@*.bin", zpath.display())).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Locator);
    assert!(err.to_string().contains("*.bin"), "{err}");
}

#[test]
fn not_an_archive() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("data.pkl");
    std::fs::write(&path, LIST_PICKLE).unwrap();
    let err = dump_to_string(&format!("{}@data.pkl", path.display())).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Locator);
}

#[test]
fn torch_style_checkpoint() {
    // torch.save() of {'w': tensor}, reduced to the parts the dumper sees.
    let pickle: &[u8] = b"\x80\x02}q\x00X\x01\x00\x00\x00wq\x01\
        ctorch._utils\n_rebuild_tensor_v2\nq\x02\
        ((X\x07\x00\x00\x00storageq\x03ctorch\nFloatStorage\nq\x04\
        X\x01\x00\x00\x000q\x05X\x03\x00\x00\x00cpuq\x06K\x04tq\x07Q\
        K\x00K\x04\x85q\x08K\x01\x85q\x09\x89\
        ccollections\nOrderedDict\nq\x0a)Rq\x0btq\x0cRq\x0ds.";
    let dir = tempfile::tempdir().unwrap();
    let zpath = dir.path().join("model.pt");
    write_zip(
        &zpath,
        &[("model/data.pkl", pickle), ("model/data/0", &[0u8; 16][..])],
    );
    let locator = Locator::parse(&format!("{}@*/data.pkl", zpath.display())).unwrap();
    let mut out = Vec::new();
    let value = cli::dump_locator(
        &locator,
        &mut out,
        UnpicklerOptions::default(),
        &PrettyPrinter::default(),
    )
    .unwrap();
    let Value::Dict(entries) = &value else {
        panic!("expected a dict, got {value:?}");
    };
    assert_eq!(entries.len(), 1);
    assert_eq!(
        String::from_utf8(out).unwrap(),
        "{'w': torch._utils._rebuild_tensor_v2(\
         pers.obj(('storage', torch.FloatStorage, '0', 'cpu', 4),),\n\
         \x20       0,\n\
         \x20       (4,),\n\
         \x20       (1,),\n\
         \x20       False,\n\
         \x20       collections.OrderedDict())}\n"
    );
}
