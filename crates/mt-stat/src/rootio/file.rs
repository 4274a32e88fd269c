//! Uncompressed ROOT file writer holding `TH1D` objects in the top directory.
//!
//! Small-file layout (32-bit seeks):
//! ```text
//! [0..BEGIN)      file header, zero padded
//! BEGIN           TFile key + name + title + TDirectory record
//!                 one key + payload per histogram
//!                 StreamerInfo key (empty TList)
//!                 KeysList key (nkeys + key headers)
//!                 FreeSegments key (TFree)
//! END
//! ```

use std::path::Path;

use mt_core::{Error, Result};

use super::th1::{Th1d, write_empty_list};
use super::wbuffer::WBuffer;

const FILE_VERSION: u32 = 62206;
const BEGIN: u32 = 100;
const KEY_VERSION: u16 = 4;
const DIR_VERSION: u16 = 5;
/// Bytes reserved after a small-file TDirectory record.
const DIR_EXTRA: usize = 12;
/// 2024-01-01 00:00:00 as a TDatime; identical histograms give identical files.
const DATIME: u32 = datime(2024, 1, 1, 0, 0, 0);

const fn datime(year: u32, month: u32, day: u32, hour: u32, min: u32, sec: u32) -> u32 {
    ((year - 1995) << 26) | (month << 22) | (day << 17) | (hour << 12) | (min << 6) | sec
}

struct KeyHeader<'a> {
    n_bytes: u32,
    obj_len: u32,
    cycle: u16,
    seek_key: u32,
    seek_pdir: u32,
    class_name: &'a str,
    name: &'a str,
    title: &'a str,
}

fn key_len(class_name: &str, name: &str, title: &str) -> usize {
    let s = |x: &str| if x.len() < 255 { 1 + x.len() } else { 5 + x.len() };
    4 + 2 + 4 + 4 + 2 + 2 + 4 + 4 + s(class_name) + s(name) + s(title)
}

impl KeyHeader<'_> {
    fn write(&self, w: &mut WBuffer) {
        w.write_u32(self.n_bytes);
        w.write_u16(KEY_VERSION);
        w.write_u32(self.obj_len);
        w.write_u32(DATIME);
        w.write_u16(key_len(self.class_name, self.name, self.title) as u16);
        w.write_u16(self.cycle);
        w.write_u32(self.seek_key);
        w.write_u32(self.seek_pdir);
        w.write_string(self.class_name);
        w.write_string(self.name);
        w.write_string(self.title);
    }
}

fn write_uuid(w: &mut WBuffer) {
    w.write_u16(1);
    w.write_zeros(16);
}

/// Collects histograms and writes them as one ROOT file.
#[derive(Debug, Default)]
pub struct RootFileWriter {
    hists: Vec<Th1d>,
}

impl RootFileWriter {
    /// Empty file.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a histogram; names must be unique within the file.
    pub fn add(&mut self, hist: Th1d) -> Result<()> {
        if self.hists.iter().any(|h| h.name == hist.name) {
            return Err(Error::Validation(format!("duplicate histogram '{}' in shapes file", hist.name)));
        }
        self.hists.push(hist);
        Ok(())
    }

    /// Histograms added so far.
    pub fn len(&self) -> usize {
        self.hists.len()
    }

    /// No histogram added yet.
    pub fn is_empty(&self) -> bool {
        self.hists.is_empty()
    }

    /// Serialize; `file_name` is recorded as the name of the top directory.
    pub fn to_bytes(&self, file_name: &str) -> Result<Vec<u8>> {
        let top_key_len = key_len("TFile", file_name, "");
        let nbytes_name = top_key_len + (1 + file_name.len()) + 1;
        let dir_len = 2 + 4 + 4 + 4 * 5 + 18 + DIR_EXTRA;
        let top_len = nbytes_name + dir_len;

        // object keys
        let mut cursor = BEGIN as usize + top_len;
        let payloads: Vec<Vec<u8>> = self.hists.iter().map(Th1d::to_bytes).collect();
        let mut seeks = Vec::with_capacity(payloads.len());
        for (h, p) in self.hists.iter().zip(&payloads) {
            seeks.push(cursor);
            cursor += key_len("TH1D", &h.name, &h.title) + p.len();
        }

        let mut info_payload = WBuffer::new();
        write_empty_list(&mut info_payload);
        let info_payload = info_payload.into_inner();
        let info_key_len = key_len("TList", "StreamerInfo", "Doubly linked list");
        let seek_info = cursor;
        let nbytes_info = info_key_len + info_payload.len();
        cursor += nbytes_info;

        let keys_key_len = key_len("TFile", file_name, "");
        let keys_payload_len: usize =
            4 + self.hists.iter().map(|h| key_len("TH1D", &h.name, &h.title)).sum::<usize>();
        let seek_keys = cursor;
        let nbytes_keys = keys_key_len + keys_payload_len;
        cursor += nbytes_keys;

        let free_key_len = key_len("TFile", file_name, "");
        let free_payload_len = 2 + 4 + 4;
        let seek_free = cursor;
        let nbytes_free = free_key_len + free_payload_len;
        let end = cursor + nbytes_free;
        if end > i32::MAX as usize {
            return Err(Error::Validation("shapes file exceeds the small-file limit".into()));
        }

        let mut w = WBuffer::new();
        // header
        w.write_bytes(b"root");
        w.write_u32(FILE_VERSION);
        w.write_u32(BEGIN);
        w.write_u32(end as u32);
        w.write_u32(seek_free as u32);
        w.write_u32(nbytes_free as u32);
        w.write_u32(1); // nfree
        w.write_u32(nbytes_name as u32);
        w.write_u8(4); // units
        w.write_u32(0); // compression
        w.write_u32(seek_info as u32);
        w.write_u32(nbytes_info as u32);
        write_uuid(&mut w);
        w.write_zeros(BEGIN as usize - w.pos());

        // top directory
        KeyHeader {
            n_bytes: top_len as u32,
            obj_len: (top_len - top_key_len) as u32,
            cycle: 1,
            seek_key: BEGIN,
            seek_pdir: 0,
            class_name: "TFile",
            name: file_name,
            title: "",
        }
        .write(&mut w);
        w.write_string(file_name);
        w.write_string("");
        w.write_u16(DIR_VERSION);
        w.write_u32(DATIME);
        w.write_u32(DATIME);
        w.write_u32(nbytes_keys as u32);
        w.write_u32(nbytes_name as u32);
        w.write_u32(BEGIN);
        w.write_u32(0);
        w.write_u32(seek_keys as u32);
        write_uuid(&mut w);
        w.write_zeros(DIR_EXTRA);

        let headers: Vec<KeyHeader<'_>> = self
            .hists
            .iter()
            .zip(&payloads)
            .zip(&seeks)
            .map(|((h, p), &seek)| KeyHeader {
                n_bytes: (key_len("TH1D", &h.name, &h.title) + p.len()) as u32,
                obj_len: p.len() as u32,
                cycle: 1,
                seek_key: seek as u32,
                seek_pdir: BEGIN,
                class_name: "TH1D",
                name: &h.name,
                title: &h.title,
            })
            .collect();
        for (header, payload) in headers.iter().zip(&payloads) {
            header.write(&mut w);
            w.write_bytes(payload);
        }

        KeyHeader {
            n_bytes: nbytes_info as u32,
            obj_len: info_payload.len() as u32,
            cycle: 1,
            seek_key: seek_info as u32,
            seek_pdir: BEGIN,
            class_name: "TList",
            name: "StreamerInfo",
            title: "Doubly linked list",
        }
        .write(&mut w);
        w.write_bytes(&info_payload);

        KeyHeader {
            n_bytes: nbytes_keys as u32,
            obj_len: keys_payload_len as u32,
            cycle: 1,
            seek_key: seek_keys as u32,
            seek_pdir: BEGIN,
            class_name: "TFile",
            name: file_name,
            title: "",
        }
        .write(&mut w);
        w.write_u32(headers.len() as u32);
        for header in &headers {
            header.write(&mut w);
        }

        KeyHeader {
            n_bytes: nbytes_free as u32,
            obj_len: free_payload_len as u32,
            cycle: 1,
            seek_key: seek_free as u32,
            seek_pdir: BEGIN,
            class_name: "TFile",
            name: file_name,
            title: "",
        }
        .write(&mut w);
        w.write_u16(1);
        w.write_u32(end as u32);
        w.write_u32(2_000_000_000);

        debug_assert_eq!(w.pos(), end);
        Ok(w.into_inner())
    }

    /// Write to `path`; the file name part becomes the directory name.
    pub fn write(&self, path: &Path) -> Result<()> {
        let file_name = path.file_name().and_then(|n| n.to_str()).unwrap_or("shapes.root");
        let bytes = self.to_bytes(file_name)?;
        std::fs::write(path, bytes).map_err(|e| Error::io_at(path, e))?;
        tracing::debug!(path = %path.display(), histograms = self.hists.len(), "wrote ROOT shapes");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Minimal big-endian reader mirroring the writer's layout.
    struct Reader<'a> {
        b: &'a [u8],
        pos: usize,
    }

    impl<'a> Reader<'a> {
        fn at(b: &'a [u8], pos: usize) -> Self {
            Self { b, pos }
        }
        fn take(&mut self, n: usize) -> &'a [u8] {
            let s = &self.b[self.pos..self.pos + n];
            self.pos += n;
            s
        }
        fn u8(&mut self) -> u8 {
            self.take(1)[0]
        }
        fn u16(&mut self) -> u16 {
            u16::from_be_bytes(self.take(2).try_into().unwrap())
        }
        fn u32(&mut self) -> u32 {
            u32::from_be_bytes(self.take(4).try_into().unwrap())
        }
        fn string(&mut self) -> String {
            let n = self.u8() as usize;
            String::from_utf8(self.take(n).to_vec()).unwrap()
        }
    }

    #[derive(Debug)]
    struct Key {
        n_bytes: u32,
        obj_len: u32,
        key_len: u16,
        seek_key: u32,
        class_name: String,
        name: String,
    }

    fn read_key(r: &mut Reader<'_>) -> Key {
        let n_bytes = r.u32();
        assert_eq!(r.u16(), KEY_VERSION);
        let obj_len = r.u32();
        let _datime = r.u32();
        let key_len = r.u16();
        let _cycle = r.u16();
        let seek_key = r.u32();
        let _pdir = r.u32();
        let class_name = r.string();
        let name = r.string();
        let _title = r.string();
        Key { n_bytes, obj_len, key_len, seek_key, class_name, name }
    }

    fn hist(name: &str, scale: f64) -> Th1d {
        Th1d::new(name, vec![0.0, 1.0, 2.0], vec![0.0, scale, 2.0 * scale, 0.0], vec![0.0, scale, 4.0 * scale, 0.0]).unwrap()
    }

    #[test]
    fn keys_list_points_at_every_histogram() {
        let mut f = RootFileWriter::new();
        f.add(hist("data_obs", 1.0)).unwrap();
        f.add(hist("b_2018", 2.0)).unwrap();
        f.add(hist("b_2018_lumiUp", 3.0)).unwrap();
        assert!(f.add(hist("b_2018", 1.0)).is_err());
        let bytes = f.to_bytes("shapes.root").unwrap();

        let mut r = Reader::at(&bytes, 0);
        assert_eq!(r.take(4), b"root");
        assert_eq!(r.u32(), FILE_VERSION);
        assert_eq!(r.u32(), BEGIN);
        let end = r.u32();
        assert_eq!(end as usize, bytes.len());

        // TDirectory after the top key and its name/title
        let mut r = Reader::at(&bytes, BEGIN as usize);
        let top = read_key(&mut r);
        assert_eq!(top.class_name, "TFile");
        assert_eq!(r.string(), "shapes.root");
        r.string();
        assert_eq!(r.u16(), DIR_VERSION);
        r.u32();
        r.u32();
        let nbytes_keys = r.u32();
        r.u32();
        assert_eq!(r.u32(), BEGIN);
        r.u32();
        let seek_keys = r.u32();

        let mut r = Reader::at(&bytes, seek_keys as usize);
        let list = read_key(&mut r);
        assert_eq!(list.n_bytes, nbytes_keys);
        assert_eq!(r.u32(), 3);
        let keys: Vec<Key> = (0..3).map(|_| read_key(&mut r)).collect();
        let names: Vec<&str> = keys.iter().map(|k| k.name.as_str()).collect();
        assert_eq!(names, ["data_obs", "b_2018", "b_2018_lumiUp"]);

        for (k, scale) in keys.iter().zip([1.0, 2.0, 3.0]) {
            assert_eq!(k.class_name, "TH1D");
            assert_eq!(k.n_bytes, k.obj_len + k.key_len as u32);
            // the key at seek_key repeats the header
            let mut at = Reader::at(&bytes, k.seek_key as usize);
            assert_eq!(read_key(&mut at).name, k.name);
            let payload = &bytes[k.seek_key as usize + k.key_len as usize..(k.seek_key + k.n_bytes) as usize];
            // last TArrayD: 4 cells
            let tail = &payload[payload.len() - 32..];
            let second = f64::from_be_bytes(tail[16..24].try_into().unwrap());
            assert_eq!(second, 2.0 * scale);
        }
    }

    #[test]
    fn empty_file_is_well_formed() {
        let bytes = RootFileWriter::new().to_bytes("empty.root").unwrap();
        let end = u32::from_be_bytes(bytes[12..16].try_into().unwrap());
        assert_eq!(end as usize, bytes.len());
    }
}
