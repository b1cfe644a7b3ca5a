use crate::{BackingStore, StoreError, SECTOR_SIZE};
use proptest::prelude::*;

const MAX_DISK_SECTORS: u64 = 256;
const MAX_RW_SECTORS: usize = 24;

fn chunk_size_strategy() -> impl Strategy<Value = usize> {
    // Small chunks force most accesses to straddle a chunk boundary.
    prop_oneof![
        Just(SECTOR_SIZE),
        Just(2 * SECTOR_SIZE),
        Just(3 * SECTOR_SIZE),
        Just(8 * SECTOR_SIZE),
        Just(BackingStore::DEFAULT_CHUNK_SIZE),
    ]
}

fn in_range_access(disk_sectors: u64) -> impl Strategy<Value = (u64, Vec<u8>)> {
    (0..disk_sectors).prop_flat_map(move |sector| {
        let max = ((disk_sectors - sector) as usize).min(MAX_RW_SECTORS);
        (Just(sector), 1..=max).prop_flat_map(|(sector, sectors)| {
            (
                Just(sector),
                prop::collection::vec(any::<u8>(), sectors * SECTOR_SIZE),
            )
        })
    })
}

fn store_and_write() -> impl Strategy<Value = (u64, usize, u64, Vec<u8>)> {
    (1..=MAX_DISK_SECTORS, chunk_size_strategy()).prop_flat_map(|(sectors, chunk)| {
        in_range_access(sectors)
            .prop_map(move |(sector, data)| (sectors, chunk, sector, data))
    })
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 64,
        .. ProptestConfig::default()
    })]

    #[test]
    fn write_then_read_roundtrips((sectors, chunk, sector, data) in store_and_write()) {
        let store = BackingStore::with_chunk_size(sectors, chunk).unwrap();
        store.write(sector, &data).unwrap();
        prop_assert_eq!(store.read(sector, data.len()).unwrap(), data);
    }

    #[test]
    fn write_does_not_touch_neighbouring_sectors((sectors, chunk, sector, data) in store_and_write()) {
        let store = BackingStore::with_chunk_size(sectors, chunk).unwrap();
        store.write(sector, &data).unwrap();

        let end = sector + (data.len() / SECTOR_SIZE) as u64;
        for s in (0..sector).chain(end..sectors) {
            let back = store.read(s, SECTOR_SIZE).unwrap();
            prop_assert!(back.iter().all(|b| *b == 0), "sector {} was modified", s);
        }
    }

    #[test]
    fn out_of_range_access_is_refused_and_leaves_store_unchanged(
        sectors in 1..=MAX_DISK_SECTORS,
        chunk in chunk_size_strategy(),
        overshoot in 1u64..16,
        len_sectors in 1usize..8,
    ) {
        let store = BackingStore::with_chunk_size(sectors, chunk).unwrap();
        let seed = vec![0x5Au8; sectors as usize * SECTOR_SIZE];
        store.write(0, &seed).unwrap();

        // Any start sector for which sector*512 + len overshoots the capacity.
        let sector = (sectors + overshoot).saturating_sub(len_sectors as u64);
        let data = vec![0xC3u8; len_sectors * SECTOR_SIZE];
        let err = store.write(sector, &data).unwrap_err();
        let is_out_of_range = matches!(err, StoreError::OutOfRange { .. });
        prop_assert!(is_out_of_range);

        let mut buf = vec![0u8; data.len()];
        let err = store.read_into(sector, &mut buf).unwrap_err();
        let is_out_of_range = matches!(err, StoreError::OutOfRange { .. });
        prop_assert!(is_out_of_range);

        prop_assert_eq!(store.read(0, seed.len()).unwrap(), seed);
    }
}
