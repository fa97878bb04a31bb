#![no_main]
use libfuzzer_sys::fuzz_target;
use oxipatch::patch::header::{HEADER_LEN, PatchHeader, SizeWidth};

fuzz_target!(|data: &[u8]| {
    let Some(buf) = data.get(..HEADER_LEN) else {
        return;
    };
    let Ok(buf) = <[u8; HEADER_LEN]>::try_from(buf) else {
        return;
    };

    let _ = PatchHeader::parse(&buf, SizeWidth::Legacy16);

    // Anything accepted with the full width must survive re-encoding.
    if let Ok(header) = PatchHeader::parse(&buf, SizeWidth::Full) {
        let again = PatchHeader::parse(&header.encode(), SizeWidth::Full).unwrap();
        assert_eq!(again, header);
    }
});
