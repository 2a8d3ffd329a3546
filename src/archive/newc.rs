// In-process SVR4 CPIO codec ("newc" 070701 and "crc" 070702).
//
// Layout of one member:
//   110-byte ASCII header | name + NUL | pad to 4 | data | pad to 4
// The archive ends with a member named "TRAILER!!!" and is padded with NULs
// to a 512-byte block, as GNU cpio does.
//
// Header fields (8 uppercase hex digits each, after the 6-byte magic):
//   ino mode uid gid nlink mtime filesize devmajor devminor
//   rdevmajor rdevminor namesize check
//
// The writer is reproducible by construction: members are written in the
// order given, inode numbers are renumbered from 1, and mtime, ownership and
// device numbers are zeroed. Only permission bits and content vary.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Component, Path, PathBuf};

use super::{ArchiveBuilder, ArchiveError, Extractor, Lister};
use crate::config::ArchiveFormat;
use crate::context::JobContext;

pub const NEWC_MAGIC: &[u8; 6] = b"070701";
pub const CRC_MAGIC: &[u8; 6] = b"070702";
pub const TRAILER_NAME: &str = "TRAILER!!!";

const HEADER_LEN: usize = 110;
const BLOCK_SIZE: u64 = 512;
const BUF_SIZE: usize = 64 * 1024;

const S_IFMT: u32 = 0o170000;
const S_IFREG: u32 = 0o100000;
const S_IFDIR: u32 = 0o040000;
const S_IFLNK: u32 = 0o120000;

// ---------------------------------------------------------------------------
// Header
// ---------------------------------------------------------------------------

/// Decoded member header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryHeader {
    pub format: ArchiveFormat,
    pub ino: u32,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub nlink: u32,
    pub mtime: u32,
    pub file_size: u32,
    pub dev_major: u32,
    pub dev_minor: u32,
    pub rdev_major: u32,
    pub rdev_minor: u32,
    pub checksum: u32,
    pub name: String,
}

impl EntryHeader {
    /// A header with every reproducibility-sensitive field zeroed.
    fn reproducible(format: ArchiveFormat, ino: u32, mode: u32, name: &str) -> Self {
        Self {
            format,
            ino,
            mode,
            uid: 0,
            gid: 0,
            nlink: 1,
            mtime: 0,
            file_size: 0,
            dev_major: 0,
            dev_minor: 0,
            rdev_major: 0,
            rdev_minor: 0,
            checksum: 0,
            name: name.to_string(),
        }
    }

    pub fn is_file(&self) -> bool {
        self.mode & S_IFMT == S_IFREG
    }

    pub fn is_dir(&self) -> bool {
        self.mode & S_IFMT == S_IFDIR
    }

    pub fn is_symlink(&self) -> bool {
        self.mode & S_IFMT == S_IFLNK
    }

    pub fn permissions(&self) -> u32 {
        self.mode & 0o7777
    }

    fn encode_into(&self, out: &mut Vec<u8>) {
        let magic = match self.format {
            ArchiveFormat::Newc => NEWC_MAGIC,
            ArchiveFormat::Crc => CRC_MAGIC,
        };
        out.extend_from_slice(magic);
        let namesize = self.name.len() as u32 + 1;
        let check = match self.format {
            ArchiveFormat::Newc => 0,
            ArchiveFormat::Crc => self.checksum,
        };
        for field in [
            self.ino,
            self.mode,
            self.uid,
            self.gid,
            self.nlink,
            self.mtime,
            self.file_size,
            self.dev_major,
            self.dev_minor,
            self.rdev_major,
            self.rdev_minor,
            namesize,
            check,
        ] {
            out.extend_from_slice(format!("{field:08X}").as_bytes());
        }
        out.extend_from_slice(self.name.as_bytes());
        out.push(0);
    }
}

fn parse_hex(field: &[u8]) -> Result<u32, ArchiveError> {
    std::str::from_utf8(field)
        .ok()
        .and_then(|s| u32::from_str_radix(s, 16).ok())
        .ok_or_else(|| {
            ArchiveError::Malformed(format!(
                "invalid header field {:?}",
                String::from_utf8_lossy(field)
            ))
        })
}

fn padding(offset: u64) -> u64 {
    (4 - offset % 4) % 4
}

/// Byte-sum checksum used by the `crc` format.
pub fn byte_sum(data: &[u8], seed: u32) -> u32 {
    data.iter()
        .fold(seed, |sum, &byte| sum.wrapping_add(u32::from(byte)))
}

// ---------------------------------------------------------------------------
// Reader
// ---------------------------------------------------------------------------

struct CountingReader<R> {
    inner: R,
    offset: u64,
}

impl<R: Read> Read for CountingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.offset += n as u64;
        Ok(n)
    }
}

/// Sums every byte that passes through, for `crc` verification.
struct SummingReader<R> {
    inner: R,
    sum: u32,
}

impl<R: Read> Read for SummingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.sum = byte_sum(&buf[..n], self.sum);
        Ok(n)
    }
}

fn read_exact_or_truncated<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<(), ArchiveError> {
    reader.read_exact(buf).map_err(|e| {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            ArchiveError::Malformed("unexpected end of archive".into())
        } else {
            ArchiveError::Io(e)
        }
    })
}

fn skip<R: Read>(reader: &mut R, len: u64) -> Result<(), ArchiveError> {
    let skipped = io::copy(&mut reader.take(len), &mut io::sink())?;
    if skipped != len {
        return Err(ArchiveError::Malformed("unexpected end of archive".into()));
    }
    Ok(())
}

fn read_header<R: Read>(reader: &mut CountingReader<R>) -> Result<EntryHeader, ArchiveError> {
    let mut raw = [0u8; HEADER_LEN];
    read_exact_or_truncated(reader, &mut raw)?;

    let format = match &raw[..6] {
        m if m == NEWC_MAGIC => ArchiveFormat::Newc,
        m if m == CRC_MAGIC => ArchiveFormat::Crc,
        other => {
            return Err(ArchiveError::Malformed(format!(
                "unsupported cpio magic {:?} at offset {}",
                String::from_utf8_lossy(other),
                reader.offset - HEADER_LEN as u64
            )));
        }
    };

    let mut fields = [0u32; 13];
    for (i, field) in fields.iter_mut().enumerate() {
        let start = 6 + i * 8;
        *field = parse_hex(&raw[start..start + 8])?;
    }
    let [
        ino,
        mode,
        uid,
        gid,
        nlink,
        mtime,
        file_size,
        dev_major,
        dev_minor,
        rdev_major,
        rdev_minor,
        namesize,
        checksum,
    ] = fields;

    if namesize == 0 {
        return Err(ArchiveError::Malformed("member with empty name".into()));
    }
    let mut name = vec![0u8; namesize as usize];
    read_exact_or_truncated(reader, &mut name)?;
    if name.pop() != Some(0) {
        return Err(ArchiveError::Malformed("member name not NUL-terminated".into()));
    }
    let name = String::from_utf8(name)
        .map_err(|_| ArchiveError::Malformed("member name is not valid UTF-8".into()))?;
    let pad = padding(reader.offset);
    skip(reader, pad)?;

    Ok(EntryHeader {
        format,
        ino,
        mode,
        uid,
        gid,
        nlink,
        mtime,
        file_size,
        dev_major,
        dev_minor,
        rdev_major,
        rdev_minor,
        checksum,
        name,
    })
}

/// Visit every member of a CPIO stream in stored order.
///
/// `visit` receives the header and a reader over the member data. Whatever
/// the visitor leaves unread is skipped, and for `crc` archives the
/// checksum of each regular file is verified after the visitor returns.
/// Stops at the trailer; trailing block padding is not read.
pub fn read_entries<R, F>(reader: R, mut visit: F) -> Result<(), ArchiveError>
where
    R: Read,
    F: FnMut(&EntryHeader, &mut dyn Read) -> Result<(), ArchiveError>,
{
    let mut reader = CountingReader {
        inner: reader,
        offset: 0,
    };

    loop {
        let header = read_header(&mut reader)?;
        if header.name == TRAILER_NAME {
            return Ok(());
        }

        let len = u64::from(header.file_size);
        let mut data = SummingReader {
            inner: (&mut reader).take(len),
            sum: 0,
        };
        visit(&header, &mut data)?;
        io::copy(&mut data, &mut io::sink())?;
        if data.inner.limit() != 0 {
            return Err(ArchiveError::Malformed(format!(
                "member {} is truncated",
                header.name
            )));
        }

        if header.format == ArchiveFormat::Crc && header.is_file() && data.sum != header.checksum
        {
            return Err(ArchiveError::ChecksumMismatch {
                name: header.name.clone(),
                expected: header.checksum,
                actual: data.sum,
            });
        }

        let pad = padding(reader.offset);
        skip(&mut reader, pad)?;
    }
}

/// Member names of a CPIO stream, in stored order.
pub fn list_names<R: Read>(reader: R) -> Result<Vec<String>, ArchiveError> {
    let mut names = Vec::new();
    read_entries(reader, |header, _| {
        names.push(header.name.clone());
        Ok(())
    })?;
    Ok(names)
}

// ---------------------------------------------------------------------------
// Writer
// ---------------------------------------------------------------------------

/// Streaming, reproducible CPIO writer.
pub struct CpioWriter<W: Write> {
    inner: W,
    format: ArchiveFormat,
    next_ino: u32,
    written: u64,
}

impl<W: Write> CpioWriter<W> {
    pub fn new(inner: W, format: ArchiveFormat) -> Self {
        Self {
            inner,
            format,
            next_ino: 1,
            written: 0,
        }
    }

    /// Append a regular file from memory with the given permission bits.
    pub fn append_data(&mut self, name: &str, permissions: u32, data: &[u8]) -> io::Result<()> {
        let size = member_size(name, data.len() as u64)?;
        let mut header = self.header(S_IFREG | (permissions & 0o7777), name);
        header.file_size = size;
        header.checksum = byte_sum(data, 0);
        self.write_header(&header)?;
        self.write_raw(data)?;
        self.pad_to_word()
    }

    /// Append a directory entry.
    pub fn append_dir(&mut self, name: &str, permissions: u32) -> io::Result<()> {
        let header = self.header(S_IFDIR | (permissions & 0o7777), name);
        self.write_header(&header)?;
        self.pad_to_word()
    }

    /// Append the file system object at `path` under `name`.
    ///
    /// Regular files are streamed; for `crc` archives the file is read once
    /// up front to compute the checksum that precedes the data.
    pub fn append_path(&mut self, name: &str, path: &Path) -> io::Result<()> {
        let meta = fs::symlink_metadata(path)?;
        let permissions = permission_bits(&meta);

        if meta.is_dir() {
            return self.append_dir(name, permissions);
        }

        if let Some(target) = link_target(&meta, path)? {
            let mut header = self.header(S_IFLNK | 0o777, name);
            header.file_size = member_size(name, target.len() as u64)?;
            self.write_header(&header)?;
            self.write_raw(&target)?;
            return self.pad_to_word();
        }

        if !meta.is_file() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{name}: unsupported file type"),
            ));
        }

        let size = member_size(name, meta.len())?;
        let checksum = match self.format {
            ArchiveFormat::Crc => checksum_file(path)?,
            ArchiveFormat::Newc => 0,
        };
        let mut header = self.header(S_IFREG | permissions, name);
        header.file_size = size;
        header.checksum = checksum;
        self.write_header(&header)?;

        let mut file = BufReader::with_capacity(BUF_SIZE, File::open(path)?);
        let copied = io::copy(&mut (&mut file).take(u64::from(size)), &mut self.inner)?;
        self.written += copied;
        if copied != u64::from(size) {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("{name}: file shrank while archiving"),
            ));
        }
        self.pad_to_word()
    }

    /// Write the trailer, pad to a 512-byte block and return the sink.
    pub fn finish(mut self) -> io::Result<W> {
        let trailer = EntryHeader::reproducible(self.format, 0, 0, TRAILER_NAME);
        self.write_header(&trailer)?;
        self.pad_to_word()?;

        let tail = (BLOCK_SIZE - self.written % BLOCK_SIZE) % BLOCK_SIZE;
        self.write_raw(&vec![0u8; tail as usize])?;
        self.inner.flush()?;
        Ok(self.inner)
    }

    fn header(&mut self, mode: u32, name: &str) -> EntryHeader {
        let ino = self.next_ino;
        self.next_ino += 1;
        EntryHeader::reproducible(self.format, ino, mode, name)
    }

    fn write_header(&mut self, header: &EntryHeader) -> io::Result<()> {
        let mut buf = Vec::with_capacity(HEADER_LEN + header.name.len() + 4);
        header.encode_into(&mut buf);
        self.write_raw(&buf)?;
        self.pad_to_word()
    }

    fn write_raw(&mut self, data: &[u8]) -> io::Result<()> {
        self.inner.write_all(data)?;
        self.written += data.len() as u64;
        Ok(())
    }

    fn pad_to_word(&mut self) -> io::Result<()> {
        let pad = padding(self.written) as usize;
        self.write_raw(&[0u8; 3][..pad])
    }
}

fn member_size(name: &str, len: u64) -> io::Result<u32> {
    u32::try_from(len).map_err(|_| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{name}: {len} bytes exceeds the cpio member size limit"),
        )
    })
}

fn checksum_file(path: &Path) -> io::Result<u32> {
    let mut file = File::open(path)?;
    let mut buf = vec![0u8; BUF_SIZE];
    let mut sum = 0u32;
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            return Ok(sum);
        }
        sum = byte_sum(&buf[..n], sum);
    }
}

#[cfg(unix)]
fn link_target(meta: &fs::Metadata, path: &Path) -> io::Result<Option<Vec<u8>>> {
    use std::os::unix::ffi::OsStringExt;
    if !meta.file_type().is_symlink() {
        return Ok(None);
    }
    Ok(Some(fs::read_link(path)?.into_os_string().into_vec()))
}

#[cfg(not(unix))]
fn link_target(_meta: &fs::Metadata, _path: &Path) -> io::Result<Option<Vec<u8>>> {
    Ok(None)
}

#[cfg(unix)]
fn permission_bits(meta: &fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
fn permission_bits(meta: &fs::Metadata) -> u32 {
    match (meta.is_dir(), meta.permissions().readonly()) {
        (true, _) => 0o755,
        (false, true) => 0o444,
        (false, false) => 0o644,
    }
}

// ---------------------------------------------------------------------------
// Extraction helpers
// ---------------------------------------------------------------------------

/// Map a member name to a path below `dest`, refusing escapes.
///
/// Returns `None` for names that denote `dest` itself (".").
fn sanitize(dest: &Path, name: &str) -> Result<Option<PathBuf>, ArchiveError> {
    let mut out = dest.to_path_buf();
    let mut depth = 0usize;
    for component in Path::new(name).components() {
        match component {
            Component::Normal(part) => {
                out.push(part);
                depth += 1;
            }
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(ArchiveError::UnsafePath(name.to_string()));
            }
        }
    }
    Ok((depth > 0).then_some(out))
}

/// Refuse to write through a symlink already present below `dest`.
///
/// Every existing directory between `dest` and `path` must be a real
/// directory. Components that do not exist yet are fine. The entry at
/// `path` itself is replaced by the caller, never followed.
fn check_no_symlinks(dest: &Path, path: &Path, name: &str) -> Result<(), ArchiveError> {
    let Ok(relative) = path.strip_prefix(dest) else {
        return Err(ArchiveError::UnsafePath(name.to_string()));
    };
    let mut current = dest.to_path_buf();
    for part in relative.parent().into_iter().flat_map(Path::components) {
        current.push(part);
        match fs::symlink_metadata(&current) {
            Ok(meta) if meta.file_type().is_symlink() => {
                return Err(ArchiveError::UnsafePath(name.to_string()));
            }
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

/// Remove whatever non-directory entry sits at `path`.
fn remove_existing(path: &Path) -> io::Result<()> {
    match fs::symlink_metadata(path) {
        Ok(meta) if !meta.is_dir() => fs::remove_file(path),
        Ok(_) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// Identity of a multiply-linked member: inode and device numbers.
type LinkKey = (u32, u32, u32);

/// Hard links in newc/crc archives carry their data only on the last link;
/// the earlier names have size 0 and are filled in once the data arrives.
#[derive(Default)]
struct PendingLinks {
    waiting: HashMap<LinkKey, Vec<PathBuf>>,
}

impl PendingLinks {
    fn key(header: &EntryHeader) -> Option<LinkKey> {
        (header.nlink > 1).then_some((header.ino, header.dev_major, header.dev_minor))
    }

    fn defer(&mut self, key: LinkKey, path: PathBuf) {
        self.waiting.entry(key).or_default().push(path);
    }

    fn resolve(&mut self, key: LinkKey, data_path: &Path) -> io::Result<usize> {
        let Some(links) = self.waiting.remove(&key) else {
            return Ok(0);
        };
        for link in &links {
            remove_existing(link)?;
            if fs::hard_link(data_path, link).is_err() {
                fs::copy(data_path, link)?;
            }
        }
        Ok(links.len())
    }
}

#[cfg(unix)]
fn apply_permissions(path: &Path, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn apply_permissions(_path: &Path, _mode: u32) -> io::Result<()> {
    Ok(())
}

// ---------------------------------------------------------------------------
// NativeCpio backend
// ---------------------------------------------------------------------------

/// Archive backend implemented with this module's codec.
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeCpio {
    format: ArchiveFormat,
}

impl NativeCpio {
    pub fn new(format: ArchiveFormat) -> Self {
        Self { format }
    }
}

impl Lister for NativeCpio {
    fn list(&self, ctx: &JobContext, archive: &Path) -> Result<Vec<String>, ArchiveError> {
        ctx.log()
            .debug(format!("Listing {} in-process", archive.display()));
        let file = File::open(archive)?;
        list_names(BufReader::with_capacity(BUF_SIZE, file))
    }
}

impl Extractor for NativeCpio {
    fn extract(&self, ctx: &JobContext, archive: &Path, dest: &Path) -> Result<(), ArchiveError> {
        let file = File::open(archive)?;
        let mut count = 0usize;
        let mut links = PendingLinks::default();

        read_entries(BufReader::with_capacity(BUF_SIZE, file), |header, data| {
            let Some(path) = sanitize(dest, &header.name)? else {
                return Ok(());
            };
            check_no_symlinks(dest, &path, &header.name)?;

            if header.is_dir() {
                remove_existing(&path)?;
                fs::create_dir_all(&path)?;
                // Owner rwx is kept so later members can be written below it.
                apply_permissions(&path, header.permissions() | 0o700)?;
            } else if header.is_file() {
                if let Some(parent) = path.parent() {
                    fs::create_dir_all(parent)?;
                }
                remove_existing(&path)?;
                let mut out = File::create(&path)?;
                io::copy(data, &mut out)?;
                let mtime = std::time::UNIX_EPOCH
                    + std::time::Duration::from_secs(u64::from(header.mtime));
                out.set_modified(mtime)?;
                drop(out);
                apply_permissions(&path, header.permissions())?;

                if let Some(key) = PendingLinks::key(header) {
                    if header.file_size == 0 {
                        links.defer(key, path);
                    } else {
                        let linked = links.resolve(key, &path)?;
                        if linked > 0 {
                            ctx.log().debug(format!(
                                "Linked {linked} earlier names to {}",
                                header.name
                            ));
                        }
                    }
                }
            } else if header.is_symlink() {
                extract_symlink(ctx, &path, &header.name, data)?;
            } else {
                ctx.log().warn(format!(
                    "skipping special member {} (mode {:o})",
                    header.name, header.mode
                ));
                return Ok(());
            }
            count += 1;
            Ok(())
        })?;

        ctx.log().info(format!(
            "Extracted {count} members from {} to {}",
            archive.display(),
            dest.display()
        ));
        Ok(())
    }
}

#[cfg(unix)]
fn extract_symlink(
    _ctx: &JobContext,
    path: &Path,
    _name: &str,
    data: &mut dyn Read,
) -> Result<(), ArchiveError> {
    use std::ffi::OsString;
    use std::os::unix::ffi::OsStringExt;

    let mut target = Vec::new();
    data.read_to_end(&mut target)?;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    remove_existing(path)?;
    std::os::unix::fs::symlink(OsString::from_vec(target), path)?;
    Ok(())
}

#[cfg(not(unix))]
fn extract_symlink(
    ctx: &JobContext,
    _path: &Path,
    name: &str,
    _data: &mut dyn Read,
) -> Result<(), ArchiveError> {
    ctx.log()
        .warn(format!("symlinks unsupported here, skipping {name}"));
    Ok(())
}

impl ArchiveBuilder for NativeCpio {
    fn build(
        &self,
        ctx: &JobContext,
        root: &Path,
        members: &[String],
        output: &Path,
    ) -> Result<(), ArchiveError> {
        ctx.log().info(format!(
            "Building {} archive in-process ({} members)",
            self.format.cpio_name(),
            members.len()
        ));
        let out = BufWriter::with_capacity(BUF_SIZE, File::create(output)?);
        let mut writer = CpioWriter::new(out, self.format);
        for name in members {
            let path = sanitize(root, name)?.ok_or_else(|| ArchiveError::UnsafePath(name.clone()))?;
            writer.append_path(name, &path)?;
        }
        writer
            .finish()?
            .into_inner()
            .map_err(|e| ArchiveError::Io(e.into_error()))?
            .sync_all()?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn archive(format: ArchiveFormat, members: &[(&str, &[u8])]) -> Vec<u8> {
        let mut writer = CpioWriter::new(Vec::new(), format);
        for (name, data) in members {
            writer.append_data(name, 0o644, data).unwrap();
        }
        writer.finish().unwrap()
    }

    fn context(dir: &Path) -> JobContext {
        JobContext::create(&dir.join("logs"), &dir.join("work")).unwrap()
    }

    #[test]
    fn header_layout_matches_svr4() {
        let bytes = archive(ArchiveFormat::Crc, &[("ab", b"xyz")]);
        assert_eq!(&bytes[..6], CRC_MAGIC);
        // ino 1, regular file 0644.
        assert_eq!(&bytes[6..14], b"00000001");
        assert_eq!(&bytes[14..22], b"000081A4");
        // filesize 3, namesize 3, check = 'x'+'y'+'z'.
        assert_eq!(&bytes[54..62], b"00000003");
        assert_eq!(&bytes[94..102], b"00000003");
        assert_eq!(&bytes[102..110], b"0000016B");
        // Name "ab\0" ends at 113; three pad bytes align the data to 116.
        assert_eq!(&bytes[110..116], b"ab\0\0\0\0");
        assert_eq!(&bytes[116..119], b"xyz");
        assert_eq!(bytes.len() % BLOCK_SIZE as usize, 0);
    }

    #[test]
    fn listing_preserves_stored_order() {
        let bytes = archive(
            ArchiveFormat::Newc,
            &[("rootfs.img", b"rootfs"), ("sw-description", b"desc"), ("a/b", b"")],
        );
        let names = list_names(&bytes[..]).unwrap();
        assert_eq!(names, ["rootfs.img", "sw-description", "a/b"]);
    }

    #[test]
    fn visitor_sees_member_data() {
        let bytes = archive(ArchiveFormat::Crc, &[("one", b"1"), ("two", b"22")]);
        let mut seen = Vec::new();
        read_entries(&bytes[..], |header, data| {
            let mut buf = Vec::new();
            data.read_to_end(&mut buf)?;
            seen.push((header.name.clone(), buf));
            Ok(())
        })
        .unwrap();
        assert_eq!(
            seen,
            [("one".to_string(), b"1".to_vec()), ("two".to_string(), b"22".to_vec())]
        );
    }

    #[test]
    fn corrupted_data_fails_crc_check() {
        let mut bytes = archive(ArchiveFormat::Crc, &[("ab", b"xyz")]);
        bytes[116] = b'X';
        match list_names(&bytes[..]) {
            Err(ArchiveError::ChecksumMismatch { name, .. }) => assert_eq!(name, "ab"),
            other => panic!("expected checksum mismatch, got {other:?}"),
        }
    }

    #[test]
    fn unknown_magic_and_truncation_are_rejected() {
        let mut odc = archive(ArchiveFormat::Newc, &[("ab", b"xyz")]);
        odc[..6].copy_from_slice(b"070707");
        assert!(matches!(list_names(&odc[..]), Err(ArchiveError::Malformed(_))));

        let bytes = archive(ArchiveFormat::Newc, &[("ab", b"xyz")]);
        assert!(matches!(
            list_names(&bytes[..118]),
            Err(ArchiveError::Malformed(_))
        ));
    }

    #[test]
    fn sanitize_refuses_escapes() {
        let dest = Path::new("/tmp/x");
        assert_eq!(
            sanitize(dest, "./a/b").unwrap(),
            Some(PathBuf::from("/tmp/x/a/b"))
        );
        assert_eq!(sanitize(dest, ".").unwrap(), None);
        assert!(matches!(
            sanitize(dest, "../etc/passwd"),
            Err(ArchiveError::UnsafePath(_))
        ));
        assert!(matches!(
            sanitize(dest, "/etc/passwd"),
            Err(ArchiveError::UnsafePath(_))
        ));
    }

    #[test]
    fn extract_then_build_is_byte_identical() {
        let dir = tempdir().unwrap();
        let ctx = context(dir.path());
        let original = dir.path().join("original.swu");
        fs::write(
            &original,
            archive(
                ArchiveFormat::Crc,
                &[("sw-description", b"software = {}"), ("images/rootfs.img", &[7u8; 5000])],
            ),
        )
        .unwrap();

        let native = NativeCpio::new(ArchiveFormat::Crc);
        let extracted = dir.path().join("x");
        fs::create_dir(&extracted).unwrap();
        native.extract(&ctx, &original, &extracted).unwrap();
        assert_eq!(
            fs::read(extracted.join("images/rootfs.img")).unwrap(),
            vec![7u8; 5000]
        );

        let members = native.list(&ctx, &original).unwrap();
        let rebuilt = dir.path().join("rebuilt.swu");
        native.build(&ctx, &extracted, &members, &rebuilt).unwrap();

        // Permissions come back as written (0644), everything else is zeroed.
        #[cfg(unix)]
        assert_eq!(fs::read(&rebuilt).unwrap(), fs::read(&original).unwrap());
        assert_eq!(native.list(&ctx, &rebuilt).unwrap(), members);
    }

    /// Hand-assembled archive, for layouts the reproducible writer never emits.
    fn raw_archive(members: &[(EntryHeader, &[u8])]) -> Vec<u8> {
        let mut out = Vec::new();
        let trailer = EntryHeader::reproducible(ArchiveFormat::Crc, 0, 0, TRAILER_NAME);
        for (header, data) in members.iter().chain([(trailer, &b""[..])].iter()) {
            header.encode_into(&mut out);
            out.resize(out.len() + padding(out.len() as u64) as usize, 0);
            out.extend_from_slice(data);
            out.resize(out.len() + padding(out.len() as u64) as usize, 0);
        }
        out
    }

    fn raw_member(ino: u32, mode: u32, nlink: u32, name: &str, data: &[u8]) -> EntryHeader {
        EntryHeader {
            nlink,
            file_size: data.len() as u32,
            checksum: byte_sum(data, 0),
            ..EntryHeader::reproducible(ArchiveFormat::Crc, ino, mode, name)
        }
    }

    #[cfg(unix)]
    #[test]
    fn extract_refuses_to_write_through_member_symlink() {
        let dir = tempdir().unwrap();
        let ctx = context(dir.path());
        let outside = dir.path().join("outside");
        fs::create_dir(&outside).unwrap();
        let link_target = outside.to_str().unwrap().as_bytes();

        let archive = dir.path().join("evil.swu");
        fs::write(
            &archive,
            raw_archive(&[
                (raw_member(1, S_IFLNK | 0o777, 1, "evil", link_target), link_target),
                (raw_member(2, S_IFREG | 0o644, 1, "evil/planted", b"pwned"), b"pwned"),
            ]),
        )
        .unwrap();

        let dest = dir.path().join("x");
        fs::create_dir(&dest).unwrap();
        let err = NativeCpio::new(ArchiveFormat::Crc)
            .extract(&ctx, &archive, &dest)
            .unwrap_err();
        assert!(matches!(err, ArchiveError::UnsafePath(name) if name == "evil/planted"));
        assert!(!outside.join("planted").exists());
    }

    #[cfg(unix)]
    #[test]
    fn file_member_replaces_symlink_instead_of_following_it() {
        let dir = tempdir().unwrap();
        let ctx = context(dir.path());
        let victim = dir.path().join("victim");
        fs::write(&victim, b"untouched").unwrap();
        let link_target = victim.to_str().unwrap().as_bytes();

        let archive = dir.path().join("evil.swu");
        fs::write(
            &archive,
            raw_archive(&[
                (raw_member(1, S_IFLNK | 0o777, 1, "image", link_target), link_target),
                (raw_member(2, S_IFREG | 0o644, 1, "image", b"payload"), b"payload"),
            ]),
        )
        .unwrap();

        let dest = dir.path().join("x");
        fs::create_dir(&dest).unwrap();
        NativeCpio::new(ArchiveFormat::Crc)
            .extract(&ctx, &archive, &dest)
            .unwrap();

        assert_eq!(fs::read(&victim).unwrap(), b"untouched");
        let extracted = dest.join("image");
        assert!(!fs::symlink_metadata(&extracted).unwrap().file_type().is_symlink());
        assert_eq!(fs::read(&extracted).unwrap(), b"payload");
    }

    #[test]
    fn hard_linked_members_share_the_last_links_data() {
        let dir = tempdir().unwrap();
        let ctx = context(dir.path());
        let archive = dir.path().join("linked.swu");
        fs::write(
            &archive,
            raw_archive(&[
                (raw_member(7, S_IFREG | 0o644, 2, "sw-description", b""), b""),
                (raw_member(9, S_IFREG | 0o644, 1, "rootfs.img", b"rootfs"), b"rootfs"),
                (raw_member(7, S_IFREG | 0o644, 2, "copy", b"shared-bytes"), b"shared-bytes"),
            ]),
        )
        .unwrap();

        let native = NativeCpio::new(ArchiveFormat::Crc);
        let dest = dir.path().join("x");
        fs::create_dir(&dest).unwrap();
        native.extract(&ctx, &archive, &dest).unwrap();

        assert_eq!(fs::read(dest.join("sw-description")).unwrap(), b"shared-bytes");
        assert_eq!(fs::read(dest.join("copy")).unwrap(), b"shared-bytes");
        assert_eq!(fs::read(dest.join("rootfs.img")).unwrap(), b"rootfs");

        // The rebuilt archive carries the data under every name.
        let members = native.list(&ctx, &archive).unwrap();
        let rebuilt = dir.path().join("rebuilt.swu");
        native.build(&ctx, &dest, &members, &rebuilt).unwrap();
        let mut sizes = Vec::new();
        read_entries(File::open(&rebuilt).unwrap(), |header, _| {
            sizes.push((header.name.clone(), header.file_size));
            Ok(())
        })
        .unwrap();
        assert_eq!(
            sizes,
            [
                ("sw-description".to_string(), 12),
                ("rootfs.img".to_string(), 6),
                ("copy".to_string(), 12)
            ]
        );
    }

    #[test]
    fn oversized_member_is_rejected() {
        assert!(member_size("big", u64::from(u32::MAX) + 1).is_err());
        assert_eq!(member_size("ok", 10).unwrap(), 10);
    }
}
