use reshape_dxbc::test_utils::{build_container, build_dxil_container};
use reshape_dxbc::{
    ContainerSigner, DxbcBlockType, DxbcError, DxbcFile, DxbcPhysicalBlockScan, FourCC,
    UnsignedContainer,
};

#[test]
fn chunk_order_is_preserved_through_stitch() {
    // Order deliberately differs from the usual compiler layout.
    let bytes = build_container(&[
        (FourCC(*b"SHEX"), &[1; 8]),
        (FourCC(*b"RDEF"), &[2; 4]),
        (FourCC(*b"ISGN"), &[3; 4]),
    ]);
    let scan = DxbcPhysicalBlockScan::scan(&bytes).expect("out-of-order chunks are legal DXBC");
    let stitched = scan.stitch(&UnsignedContainer).unwrap();

    let order: Vec<FourCC> = DxbcFile::parse(&stitched)
        .unwrap()
        .chunks()
        .map(|c| c.fourcc)
        .collect();
    assert_eq!(
        order,
        vec![FourCC(*b"SHEX"), FourCC(*b"RDEF"), FourCC(*b"ISGN")]
    );
}

#[test]
fn dxil_containers_are_signed_as_dxil() {
    struct RecordingSigner(std::sync::Mutex<Option<bool>>);
    impl ContainerSigner for RecordingSigner {
        fn sign(&self, _container: &mut [u8], has_dxil: bool) -> Result<(), DxbcError> {
            *self.0.lock().unwrap() = Some(has_dxil);
            Ok(())
        }
    }

    let bytes = build_dxil_container(&[0u8; 32]);
    let scan = DxbcPhysicalBlockScan::scan(&bytes).unwrap();
    assert_eq!(scan.sections().len(), 5);
    assert_eq!(
        scan.find(DxbcBlockType::Dxil).map(|s| s.data.len()),
        Some(32)
    );

    let signer = RecordingSigner(std::sync::Mutex::new(None));
    scan.stitch(&signer).unwrap();
    assert_eq!(*signer.0.lock().unwrap(), Some(true));
}

#[test]
fn signer_errors_propagate() {
    struct Refuse;
    impl ContainerSigner for Refuse {
        fn sign(&self, _container: &mut [u8], _has_dxil: bool) -> Result<(), DxbcError> {
            Err(DxbcError::signing("no signer available"))
        }
    }

    let bytes = build_container(&[(FourCC(*b"SHDR"), &[0; 4])]);
    let scan = DxbcPhysicalBlockScan::scan(&bytes).unwrap();
    let err = scan.stitch(&Refuse).unwrap_err();
    assert_eq!(err.context(), "no signer available");
}

#[test]
fn debug_summary_lists_every_chunk() {
    let bytes = build_container(&[(FourCC(*b"RDEF"), &[0; 4]), (FourCC(*b"SHDR"), &[0; 12])]);
    let summary = DxbcFile::parse(&bytes).unwrap().debug_summary();
    assert!(summary.starts_with("DXBC"), "{summary}");
    assert!(summary.contains("RDEF"));
    assert!(summary.contains("SHDR @"));
    assert!(summary.contains("12 bytes"));
}
