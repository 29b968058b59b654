// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Filesystem scenarios: path translation, the RAM-volume round trip, and
//! directory enumeration.

use abi::{AccessMode, OsError};
use test_suite::{init_osal, init_osal_with_ram};

#[test]
fn path_translation_and_rejection() {
    let os = init_osal_with_ram();
    assert_eq!(
        os.translate_path("/ram/foo.bin").unwrap(),
        "/ramdev0/foo.bin"
    );
    assert_eq!(
        os.translate_path("/unknown/foo.bin"),
        Err(OsError::FsPathInvalid)
    );
}

#[test]
fn ram_volume_round_trip() {
    // The full scenario: format, mount, write, read back, remove.
    let os = init_osal();
    os.mkfs("/ramdev0", "RAM0", 512, 2048).unwrap();
    os.mount("/ramdev0", "/ram").unwrap();

    let written = b"nineteen bytes long";
    assert_eq!(written.len(), 19);

    let fd = os.creat("/ram/a", AccessMode::WriteOnly).unwrap();
    assert_eq!(os.write(fd, written).unwrap(), 19);
    os.close(fd).unwrap();

    let fd = os.open("/ram/a", AccessMode::ReadOnly, 0).unwrap();
    let mut buf = [0u8; 32];
    assert_eq!(os.read(fd, &mut buf).unwrap(), 19);
    assert_eq!(&buf[..19], written);
    os.close(fd).unwrap();

    os.remove("/ram/a").unwrap();
    assert_eq!(
        os.open("/ram/a", AccessMode::ReadOnly, 0),
        Err(OsError::FsError)
    );
}

#[test]
fn open_close_bookkeeping() {
    let os = init_osal_with_ram();
    let fd = os.creat("/ram/book", AccessMode::ReadWrite).unwrap();
    os.close(fd).unwrap();
    // The handle is gone; the path opens again cleanly.
    assert_eq!(os.fd_get_info(fd).map(drop), Err(OsError::FsInvalidFd));
    let fd2 = os.open("/ram/book", AccessMode::ReadOnly, 0).unwrap();
    assert_eq!(os.fd_get_info(fd2).unwrap().path, "/ram/book");
    os.close(fd2).unwrap();
}

#[test]
fn directory_enumeration_scenario() {
    let os = init_osal_with_ram();
    os.mkdir("/ram/d").unwrap();
    os.close(os.creat("/ram/d/f1", AccessMode::WriteOnly).unwrap())
        .unwrap();
    os.close(os.creat("/ram/d/f2", AccessMode::WriteOnly).unwrap())
        .unwrap();

    let d = os.opendir("/ram/d").unwrap();
    let mut names = Vec::new();
    for _ in 0..2 {
        names.push(os.readdir(d).unwrap().expect("listing ended early"));
    }
    assert!(names.contains(&"f1".to_string()));
    assert!(names.contains(&"f2".to_string()));
    assert_eq!(os.readdir(d).unwrap(), None);

    os.rewinddir(d).unwrap();
    assert_eq!(os.readdir(d).unwrap().unwrap(), names[0]);
    os.closedir(d).unwrap();
}

#[test]
fn host_volume_round_trip() {
    let os = init_osal();
    os.mkfs("/eedev0", "EE", 512, 0).unwrap();
    os.mount("/eedev0", "/cf").unwrap();

    let fd = os.creat("/cf/host_file.dat", AccessMode::ReadWrite).unwrap();
    os.write(fd, b"persisted").unwrap();
    os.lseek(fd, 0, abi::SeekWhence::Set).unwrap();
    let mut buf = [0u8; 16];
    let n = os.read(fd, &mut buf).unwrap();
    assert_eq!(&buf[..n], b"persisted");
    os.close(fd).unwrap();

    let st = os.stat("/cf/host_file.dat").unwrap();
    assert_eq!(st.size, 9);
    assert!(!st.is_dir);
    os.remove("/cf/host_file.dat").unwrap();
}

#[test]
fn stat_reports_size_and_kind() {
    let os = init_osal_with_ram();
    os.mkdir("/ram/sub").unwrap();
    let fd = os.creat("/ram/sub/data", AccessMode::WriteOnly).unwrap();
    os.write(fd, &[0u8; 100]).unwrap();
    os.close(fd).unwrap();

    let st = os.stat("/ram/sub/data").unwrap();
    assert_eq!(st.size, 100);
    assert!(!st.is_dir);
    assert_eq!(st.mtime_secs, 0, "RAM backend keeps no mtimes");
    assert!(os.stat("/ram/sub").unwrap().is_dir);
}

#[test]
fn volume_capacity_reporting() {
    let os = init_osal_with_ram();
    let before = os.fs_stat_volume("/ram/").unwrap();
    assert_eq!(before.blocks_total, 2048);
    let fd = os.creat("/ram/blocky", AccessMode::WriteOnly).unwrap();
    os.write(fd, &[1u8; 5 * 512]).unwrap();
    os.close(fd).unwrap();
    let after = os.fs_stat_volume("/ram/").unwrap();
    assert_eq!(before.blocks_free - after.blocks_free, 5);
}
