#![no_main]

use libfuzzer_sys::fuzz_target;
use varray::Text;

fuzz_target!(|data: &[u8]| {
    if let Ok(s) = std::str::from_utf8(data) {
        let interned = Text::intern(s);
        let plain = Text::new(s);

        assert_eq!(interned.as_str(), s);
        assert_eq!(plain.as_str(), s);
        assert_eq!(interned, plain);
        assert_eq!(interned.len(), s.len());
        assert_eq!(interned.hash_code(), plain.hash_code());

        // A second interning round must produce the identical handle.
        let again = Text::intern(s);
        assert!(interned.same_identity(&again));

        // Clones share identity and drop cleanly.
        let c = plain.clone();
        assert!(c.same_identity(&plain));
        drop(c);
        assert_eq!(plain.as_str(), s);
    }
});
