//! Synthetic disk images for end-to-end tests.
//!
//! Layout of the NTFS volume (4 KiB clusters, 1 KiB records):
//! - cluster 0: boot sector
//! - clusters 4..12: `$MFT` (32 records)
//! - clusters 16..20: `$LogFile` (two restart pages, two record pages)
//! - cluster 24: `$UsnJrnl:$J` data, after one sparse cluster

#![allow(dead_code)]

pub const CLUSTER: usize = 4096;
pub const RECORD: usize = 1024;
pub const PAGE: usize = 4096;
pub const PARTITION_LBA: usize = 2048;
pub const VOLUME_SECTORS: u64 = 256;

/// 2020-11-16T11:33:20Z
pub const FT: u64 = 132_500_000_000_000_000;
pub const SECOND: u64 = 10_000_000;

pub const USERS: (u64, u16) = (16, 1);
pub const EVIDENCE: (u64, u16) = (17, 2);
pub const OLD_TMP: (u64, u16) = (18, 3);

fn reference(entry: u64, seq: u16) -> u64 {
    entry | ((seq as u64) << 48)
}

fn root() -> u64 {
    reference(5, 5)
}

/// Move sector tails into the update sequence array and stamp them
fn protect(buf: &mut [u8], usa_offset: usize, count: usize, seq: u16) {
    let stride = buf.len() / (count - 1);
    buf[usa_offset..usa_offset + 2].copy_from_slice(&seq.to_le_bytes());
    for i in 1..count {
        let tail = i * stride - 2;
        let (a, b) = (buf[tail], buf[tail + 1]);
        buf[usa_offset + i * 2] = a;
        buf[usa_offset + i * 2 + 1] = b;
        buf[tail..tail + 2].copy_from_slice(&seq.to_le_bytes());
    }
}

pub fn boot_sector() -> Vec<u8> {
    let mut bs = vec![0u8; 512];
    bs[0..3].copy_from_slice(&[0xEB, 0x52, 0x90]);
    bs[3..11].copy_from_slice(b"NTFS    ");
    bs[0x0B..0x0D].copy_from_slice(&512u16.to_le_bytes());
    bs[0x0D] = 8;
    bs[0x28..0x30].copy_from_slice(&VOLUME_SECTORS.to_le_bytes());
    bs[0x30..0x38].copy_from_slice(&4u64.to_le_bytes());
    bs[0x38..0x40].copy_from_slice(&2u64.to_le_bytes());
    bs[0x40] = 0xF6;
    bs[0x44] = 1;
    bs[0x48..0x50].copy_from_slice(&0x00C0_FFEE_0000_0001u64.to_le_bytes());
    bs[510] = 0x55;
    bs[511] = 0xAA;
    bs
}

fn si_value(ft: u64) -> Vec<u8> {
    let mut v = vec![0u8; 72];
    for i in 0..4 {
        v[i * 8..i * 8 + 8].copy_from_slice(&ft.to_le_bytes());
    }
    v
}

fn fn_value(parent: u64, name: &str, ft: u64) -> Vec<u8> {
    let units: Vec<u16> = name.encode_utf16().collect();
    let mut v = vec![0u8; 66 + units.len() * 2];
    v[0..8].copy_from_slice(&parent.to_le_bytes());
    for i in 0..4 {
        v[8 + i * 8..16 + i * 8].copy_from_slice(&ft.to_le_bytes());
    }
    v[64] = units.len() as u8;
    v[65] = 3;
    for (i, u) in units.iter().enumerate() {
        v[66 + i * 2..68 + i * 2].copy_from_slice(&u.to_le_bytes());
    }
    v
}

fn resident(type_code: u32, value: &[u8]) -> Vec<u8> {
    let len = (24 + value.len()).next_multiple_of(8);
    let mut a = vec![0u8; len];
    a[0..4].copy_from_slice(&type_code.to_le_bytes());
    a[4..8].copy_from_slice(&(len as u32).to_le_bytes());
    a[10..12].copy_from_slice(&24u16.to_le_bytes());
    a[16..20].copy_from_slice(&(value.len() as u32).to_le_bytes());
    a[20..22].copy_from_slice(&24u16.to_le_bytes());
    a[24..24 + value.len()].copy_from_slice(value);
    a
}

fn non_resident(name: &str, runs: &[u8], data_size: u64) -> Vec<u8> {
    let units: Vec<u16> = name.encode_utf16().collect();
    let runs_offset = (64 + units.len() * 2).next_multiple_of(8);
    let len = (runs_offset + runs.len() + 1).next_multiple_of(8);
    let mut a = vec![0u8; len];
    a[0..4].copy_from_slice(&0x80u32.to_le_bytes());
    a[4..8].copy_from_slice(&(len as u32).to_le_bytes());
    a[8] = 1;
    a[9] = units.len() as u8;
    a[10..12].copy_from_slice(&64u16.to_le_bytes());
    for (i, u) in units.iter().enumerate() {
        a[64 + i * 2..66 + i * 2].copy_from_slice(&u.to_le_bytes());
    }
    a[32..34].copy_from_slice(&(runs_offset as u16).to_le_bytes());
    a[40..48].copy_from_slice(&data_size.next_multiple_of(CLUSTER as u64).to_le_bytes());
    a[48..56].copy_from_slice(&data_size.to_le_bytes());
    a[56..64].copy_from_slice(&data_size.to_le_bytes());
    a[runs_offset..runs_offset + runs.len()].copy_from_slice(runs);
    a
}

/// One run: 1-byte cluster count, 1-byte LCN
fn run(clusters: u8, lcn: u8) -> Vec<u8> {
    vec![0x11, clusters, lcn]
}

pub fn file_record(seq: u16, flags: u16, attrs: &[Vec<u8>]) -> Vec<u8> {
    let mut r = vec![0u8; RECORD];
    r[0..4].copy_from_slice(b"FILE");
    r[4..6].copy_from_slice(&0x30u16.to_le_bytes());
    r[6..8].copy_from_slice(&3u16.to_le_bytes());
    r[16..18].copy_from_slice(&seq.to_le_bytes());
    r[18..20].copy_from_slice(&1u16.to_le_bytes());
    r[20..22].copy_from_slice(&0x38u16.to_le_bytes());
    r[22..24].copy_from_slice(&flags.to_le_bytes());
    r[28..32].copy_from_slice(&(RECORD as u32).to_le_bytes());

    let mut off = 0x38;
    for a in attrs {
        r[off..off + a.len()].copy_from_slice(a);
        off += a.len();
    }
    r[off..off + 4].copy_from_slice(&0xFFFF_FFFFu32.to_le_bytes());
    r[24..28].copy_from_slice(&((off + 8) as u32).to_le_bytes());
    protect(&mut r, 0x30, 3, 1);
    r
}

fn named(seq: u16, flags: u16, parent: u64, name: &str, ft: u64) -> Vec<u8> {
    file_record(seq, flags, &[resident(0x10, &si_value(ft)), resident(0x30, &fn_value(parent, name, ft))])
}

pub fn usn_record(usn: u64, file: (u64, u16), parent: (u64, u16), ft: u64, reason: u32, name: &str) -> Vec<u8> {
    let units: Vec<u16> = name.encode_utf16().collect();
    let len = (60 + units.len() * 2).next_multiple_of(8);
    let mut r = vec![0u8; len];
    r[0..4].copy_from_slice(&(len as u32).to_le_bytes());
    r[4..6].copy_from_slice(&2u16.to_le_bytes());
    r[8..16].copy_from_slice(&reference(file.0, file.1).to_le_bytes());
    r[16..24].copy_from_slice(&reference(parent.0, parent.1).to_le_bytes());
    r[24..32].copy_from_slice(&usn.to_le_bytes());
    r[32..40].copy_from_slice(&ft.to_le_bytes());
    r[40..44].copy_from_slice(&reason.to_le_bytes());
    r[56..58].copy_from_slice(&((units.len() * 2) as u16).to_le_bytes());
    r[58..60].copy_from_slice(&60u16.to_le_bytes());
    for (i, u) in units.iter().enumerate() {
        r[60 + i * 2..62 + i * 2].copy_from_slice(&u.to_le_bytes());
    }
    r
}

pub fn usn_stream() -> Vec<u8> {
    let mut j = usn_record(0x1000, EVIDENCE, USERS, FT + SECOND, 0x100, "evidence.txt");
    j.extend(usn_record(0x1060, OLD_TMP, USERS, FT + 2 * SECOND, 0x8000_0200, "old.tmp"));
    j
}

fn restart_page(current_lsn: u64) -> Vec<u8> {
    let mut p = vec![0u8; PAGE];
    p[0..4].copy_from_slice(b"RSTR");
    p[4..6].copy_from_slice(&0x1Eu16.to_le_bytes());
    p[6..8].copy_from_slice(&9u16.to_le_bytes());
    p[0x10..0x14].copy_from_slice(&(PAGE as u32).to_le_bytes());
    p[0x14..0x18].copy_from_slice(&(PAGE as u32).to_le_bytes());
    p[0x18..0x1A].copy_from_slice(&0x30u16.to_le_bytes());
    p[0x1A..0x1C].copy_from_slice(&1i16.to_le_bytes());
    p[0x1C..0x1E].copy_from_slice(&1i16.to_le_bytes());
    let ra = 0x30;
    p[ra..ra + 8].copy_from_slice(&current_lsn.to_le_bytes());
    p[ra + 8..ra + 10].copy_from_slice(&1u16.to_le_bytes());
    p[ra + 0x18..ra + 0x20].copy_from_slice(&((4 * PAGE) as u64).to_le_bytes());
    p[ra + 0x24..ra + 0x26].copy_from_slice(&0x30u16.to_le_bytes());
    p[ra + 0x26..ra + 0x28].copy_from_slice(&0x40u16.to_le_bytes());
    protect(&mut p, 0x1E, 9, 2);
    p
}

fn log_record(lsn: u64, redo_op: u16, undo_op: u16, redo: &[u8], target_vcn: u64, cbo: u16) -> Vec<u8> {
    let redo_off = 0x28;
    let undo_off = redo_off + redo.len().next_multiple_of(8);
    let client_len = undo_off;
    let mut r = vec![0u8; (0x30 + client_len).next_multiple_of(8)];
    r[0..8].copy_from_slice(&lsn.to_le_bytes());
    r[8..16].copy_from_slice(&(lsn - 0x10).to_le_bytes());
    r[0x18..0x1C].copy_from_slice(&(client_len as u32).to_le_bytes());
    r[0x20..0x24].copy_from_slice(&1u32.to_le_bytes());
    r[0x24..0x28].copy_from_slice(&0x18u32.to_le_bytes());

    let c = 0x30;
    r[c..c + 2].copy_from_slice(&redo_op.to_le_bytes());
    r[c + 2..c + 4].copy_from_slice(&undo_op.to_le_bytes());
    r[c + 4..c + 6].copy_from_slice(&(redo_off as u16).to_le_bytes());
    r[c + 6..c + 8].copy_from_slice(&(redo.len() as u16).to_le_bytes());
    r[c + 8..c + 10].copy_from_slice(&(undo_off as u16).to_le_bytes());
    r[c + 14..c + 16].copy_from_slice(&1u16.to_le_bytes());
    r[c + 20..c + 22].copy_from_slice(&cbo.to_le_bytes());
    r[c + 24..c + 32].copy_from_slice(&target_vcn.to_le_bytes());
    r[c + 32..c + 40].copy_from_slice(&16u64.to_le_bytes());
    r[c + redo_off..c + redo_off + redo.len()].copy_from_slice(redo);
    r
}

fn record_page(records: &[Vec<u8>]) -> Vec<u8> {
    let mut p = vec![0u8; PAGE];
    p[0..4].copy_from_slice(b"RCRD");
    p[4..6].copy_from_slice(&0x28u16.to_le_bytes());
    p[6..8].copy_from_slice(&9u16.to_le_bytes());
    let mut pos = 0x40;
    for r in records {
        p[pos..pos + r.len()].copy_from_slice(r);
        pos += r.len();
    }
    protect(&mut p, 0x28, 9, 3);
    p
}

pub fn evidence_record() -> Vec<u8> {
    named(EVIDENCE.1, 0x0001, reference(USERS.0, USERS.1), "evidence.txt", FT)
}

/// `$LogFile`: the file record of `evidence.txt` being initialised, then a commit
pub fn logfile_stream() -> Vec<u8> {
    // entry 17 at 1 KiB records: VCN 4, block 2
    let image = evidence_record();
    let init = log_record(0x2000, 0x02, 0x03, &image[..0x200], 4, 2);
    let commit = log_record(0x2010, 0x1B, 0x00, &[], 0, 0);

    let mut log = restart_page(0x2010);
    log.extend(restart_page(0x2000));
    log.extend(record_page(&[init, commit]));
    log.extend(vec![0u8; PAGE]);
    log
}

pub fn mft_stream() -> Vec<u8> {
    let usn_len = usn_stream().len() as u64;
    let mut slots = vec![vec![0u8; RECORD]; 32];

    slots[0] = file_record(
        1,
        0x0001,
        &[resident(0x10, &si_value(FT)), non_resident("", &run(8, 4), (32 * RECORD) as u64)],
    );
    slots[2] = file_record(
        2,
        0x0001,
        &[resident(0x10, &si_value(FT)), non_resident("", &run(4, 16), (4 * PAGE) as u64)],
    );
    slots[5] = named(5, 0x0003, root(), ".", FT);
    slots[11] = named(11, 0x0003, root(), "$Extend", FT);

    let mut j_runs = vec![0x01, 0x01];
    j_runs.extend(run(1, 24));
    slots[13] = file_record(
        1,
        0x0001,
        &[
            resident(0x10, &si_value(FT)),
            resident(0x30, &fn_value(reference(11, 11), "$UsnJrnl", FT)),
            non_resident("$J", &j_runs, CLUSTER as u64 + usn_len),
        ],
    );

    slots[USERS.0 as usize] = named(USERS.1, 0x0003, root(), "Users", FT);
    slots[EVIDENCE.0 as usize] = evidence_record();
    slots[OLD_TMP.0 as usize] = named(OLD_TMP.1, 0x0000, reference(USERS.0, USERS.1), "old.tmp", FT);
    slots.concat()
}

pub fn volume() -> Vec<u8> {
    let mut v = vec![0u8; VOLUME_SECTORS as usize * 512];
    v[..512].copy_from_slice(&boot_sector());
    let mft = mft_stream();
    v[4 * CLUSTER..4 * CLUSTER + mft.len()].copy_from_slice(&mft);
    let log = logfile_stream();
    v[16 * CLUSTER..16 * CLUSTER + log.len()].copy_from_slice(&log);
    let usn = usn_stream();
    v[24 * CLUSTER..24 * CLUSTER + usn.len()].copy_from_slice(&usn);
    v
}

/// MBR disk with the volume at LBA 2048 and a trailing backup boot sector
pub fn disk() -> Vec<u8> {
    let mut d = vec![0u8; PARTITION_LBA * 512];
    let e = 0x1BE;
    d[e + 4] = 0x07;
    d[e + 8..e + 12].copy_from_slice(&(PARTITION_LBA as u32).to_le_bytes());
    d[e + 12..e + 16].copy_from_slice(&((VOLUME_SECTORS + 1) as u32).to_le_bytes());
    d[510] = 0x55;
    d[511] = 0xAA;
    d.extend(volume());
    d.extend(boot_sector());
    d
}
