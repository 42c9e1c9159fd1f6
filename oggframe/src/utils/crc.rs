//! CRC-32 used to protect Ogg pages.
//!
//! The generator polynomial is the Ethernet one (0x04C11DB7), but the
//! algorithm is unreflected and runs MSB-first with an initial value and
//! final XOR of 0, which is not what most "CRC-32" crates compute.

/// CRC algorithm parameters: polynomial and initial value.
pub struct Algorithm<T> {
    poly: T,
    init: T,
}

/// CRC-32 algorithm for Ogg page checksums.
pub const CRC_OGG_PAGE_ALG: Algorithm<u32> = Algorithm {
    poly: 0x04C1_1DB7,
    init: 0x0000_0000,
};

/// Shifts one table index through eight rounds of the polynomial.
#[inline(always)]
pub const fn crc32(poly: u32, value: u8, len: usize) -> u32 {
    let mut value = (value as u32) << 24;

    let mut i = 0;
    while i < len {
        value = (value << 1) ^ (((value >> 31) & 1) * poly);
        i += 1;
    }

    value
}

#[inline(always)]
const fn crc32_table(poly: u32) -> [u32; 256] {
    let mut table = [0u32; 256];
    let mut i = 0;
    while i < table.len() {
        table[i] = crc32(poly, i as u8, 8);
        i += 1;
    }

    table
}

#[derive(Debug)]
pub struct Crc32 {
    pub poly: u32,
    pub init: u32,
    table: [u32; 256],
}

/// Table for page checksums, built at compile time.
pub static OGG_PAGE_CRC: Crc32 = Crc32::new(&CRC_OGG_PAGE_ALG);

impl Crc32 {
    pub const fn new(algorithm: &Algorithm<u32>) -> Self {
        Self {
            poly: algorithm.poly,
            init: algorithm.init,
            table: crc32_table(algorithm.poly),
        }
    }

    const fn table_entry(&self, index: u32) -> u32 {
        self.table[(index & 0xFF) as usize]
    }

    #[inline(always)]
    pub const fn update(&self, mut crc: u32, bytes: &[u8]) -> u32 {
        let mut i = 0;

        while i < bytes.len() {
            crc = (crc << 8) ^ self.table_entry((crc >> 24) ^ bytes[i] as u32);
            i += 1;
        }

        crc
    }

    /// Feeds `len` zero bytes, used for the checksum field of a page header.
    #[inline(always)]
    pub const fn update_zeros(&self, mut crc: u32, len: usize) -> u32 {
        let mut i = 0;

        while i < len {
            crc = (crc << 8) ^ self.table_entry(crc >> 24);
            i += 1;
        }

        crc
    }
}

#[test]
fn crc_table_entries() {
    assert_eq!(OGG_PAGE_CRC.table[0], 0);
    assert_eq!(OGG_PAGE_CRC.table[1], 0x04C1_1DB7);
    assert_eq!(OGG_PAGE_CRC.table[0x80], 0x690C_E0EE);
    assert_eq!(OGG_PAGE_CRC.table[0xFF], 0xB1F7_40B4);
}

#[test]
fn crc_check_value() {
    let crc = OGG_PAGE_CRC.update(OGG_PAGE_CRC.init, b"123456789");
    assert_eq!(crc, 0x89A1_897F);
}

#[test]
fn crc_zero_run_matches_explicit_zeros() {
    let seed = OGG_PAGE_CRC.update(0, b"OggS");
    assert_eq!(
        OGG_PAGE_CRC.update_zeros(seed, 4),
        OGG_PAGE_CRC.update(seed, &[0, 0, 0, 0])
    );
}
