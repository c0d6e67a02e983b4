use gscope::domain::ScopeError;
use gscope::side_tables::ElfImage;
use std::path::Path;

#[test]
fn test_non_go_binary_has_no_pclntab() {
    // Our own binary is an ELF without Go runtime tables
    let binary_path = env!("CARGO_BIN_EXE_gscope");
    let err = ElfImage::open(Path::new(binary_path)).unwrap_err();
    match err {
        ScopeError::MissingSection { section, .. } => assert_eq!(section, ".gopclntab"),
        other => panic!("unexpected error {other}"),
    }
}

#[test]
fn test_missing_binary_is_io_error() {
    let err = ElfImage::open(Path::new("/nonexistent/binary")).unwrap_err();
    assert!(matches!(err, ScopeError::Io(_)));
}
