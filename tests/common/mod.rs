//! Test-side writer for synthetic MDict containers.
#![allow(dead_code)]

use std::io::Write;

use adler2::adler32_slice;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use mdict_container::mdict::codec::crypto;
use mdict_container::mdict::types::models::CompressionType;
use tempfile::NamedTempFile;

/// How a block is stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Packing {
    Stored,
    Zlib,
    /// LZO tag with the plain bytes as payload; only an identity codec reads it.
    Lzo,
}

impl Packing {
    fn tag(self) -> [u8; 4] {
        match self {
            Packing::Stored => CompressionType::None,
            Packing::Lzo => CompressionType::Lzo,
            Packing::Zlib => CompressionType::Zlib,
        }
        .tag()
    }
}

pub fn zlib(data: &[u8]) -> Vec<u8> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

pub fn encode_block(packing: Packing, plain: &[u8]) -> Vec<u8> {
    let mut out = packing.tag().to_vec();
    out.extend_from_slice(&adler32_slice(plain).to_be_bytes());
    match packing {
        Packing::Zlib => out.extend_from_slice(&zlib(plain)),
        Packing::Stored | Packing::Lzo => out.extend_from_slice(plain),
    }
    out
}

/// Inverse of the key index cipher.
pub fn fast_encrypt(data: &mut [u8], key: &[u8]) {
    let mut previous = 0x36u8;
    for (i, byte) in data.iter_mut().enumerate() {
        let mixed = *byte ^ previous ^ (i as u8) ^ key[i % key.len()];
        *byte = mixed.rotate_left(4);
        previous = *byte;
    }
}

/// Registration code that unlocks `key` for `email` under `RegisterBy="EMail"`.
pub fn reg_code_for(key: &[u8; 16], email: &str) -> Vec<u8> {
    let identifier: Vec<u8> = email.encode_utf16().flat_map(u16::to_le_bytes).collect();
    let digest = crypto::ripemd128(&identifier);
    let mut reg_code = key.to_vec();
    crypto::salsa20_8(&mut reg_code, &digest);
    reg_code
}

fn push_number(out: &mut Vec<u8>, value: u64, width: usize) {
    match width {
        8 => out.extend_from_slice(&value.to_be_bytes()),
        _ => out.extend_from_slice(&(value as u32).to_be_bytes()),
    }
}

fn escape(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// A built container and where its record blocks start.
pub struct Container {
    pub bytes: Vec<u8>,
    pub record_blocks_offset: usize,
}

impl Container {
    pub fn write(&self) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(&self.bytes).unwrap();
        file.flush().unwrap();
        file
    }
}

pub struct ContainerBuilder {
    version: String,
    attributes: Vec<(String, String)>,
    keys: Vec<(u64, String)>,
    keys_per_block: usize,
    key_packing: Packing,
    records: Vec<(Packing, Vec<u8>)>,
    passcode_key: Option<[u8; 16]>,
    encrypt_index: bool,
    record_entries: Option<u64>,
    record_blocks_len_delta: i64,
}

impl ContainerBuilder {
    pub fn new(version: &str) -> Self {
        Self {
            version: version.to_string(),
            attributes: vec![
                ("Encoding".into(), "UTF-8".into()),
                ("Encrypted".into(), "No".into()),
                ("Title".into(), "Synthetic".into()),
            ],
            keys: Vec::new(),
            keys_per_block: usize::MAX,
            key_packing: Packing::Zlib,
            records: Vec::new(),
            passcode_key: None,
            encrypt_index: false,
            record_entries: None,
            record_blocks_len_delta: 0,
        }
    }

    pub fn attribute(mut self, name: &str, value: &str) -> Self {
        self.attributes.retain(|(n, _)| n != name);
        self.attributes.push((name.to_string(), value.to_string()));
        self
    }

    pub fn key(mut self, offset: u64, text: &str) -> Self {
        self.keys.push((offset, text.to_string()));
        self
    }

    pub fn record_block(mut self, packing: Packing, plain: &[u8]) -> Self {
        self.records.push((packing, plain.to_vec()));
        self
    }

    /// Adds keys with consecutive payloads, `per_block` payloads per record block.
    pub fn entries(mut self, pairs: &[(&str, &[u8])], per_block: usize, packing: Packing) -> Self {
        let mut offset: u64 = self.records.iter().map(|(_, plain)| plain.len() as u64).sum();
        for chunk in pairs.chunks(per_block) {
            let mut plain = Vec::new();
            for (key, payload) in chunk {
                self.keys.push((offset, key.to_string()));
                offset += payload.len() as u64;
                plain.extend_from_slice(payload);
            }
            self.records.push((packing, plain));
        }
        self
    }

    /// Adds text entries; each payload is written NUL-terminated.
    pub fn text_entries(self, pairs: &[(&str, &str)], per_block: usize, packing: Packing) -> Self {
        let owned: Vec<(&str, Vec<u8>)> = pairs
            .iter()
            .map(|(key, text)| (*key, format!("{text}\0").into_bytes()))
            .collect();
        let borrowed: Vec<(&str, &[u8])> = owned.iter().map(|(k, v)| (*k, v.as_slice())).collect();
        self.entries(&borrowed, per_block, packing)
    }

    pub fn keys_per_block(mut self, n: usize) -> Self {
        self.keys_per_block = n;
        self
    }

    pub fn key_packing(mut self, packing: Packing) -> Self {
        self.key_packing = packing;
        self
    }

    /// Encrypts the key section numbers with `key`; the `Encrypted` attribute is left alone.
    pub fn encrypt_key_section(mut self, key: [u8; 16]) -> Self {
        self.passcode_key = Some(key);
        self
    }

    /// Encrypts the key index; the `Encrypted` attribute is left alone.
    pub fn encrypt_key_index(mut self) -> Self {
        self.encrypt_index = true;
        self
    }

    pub fn record_entries(mut self, n: u64) -> Self {
        self.record_entries = Some(n);
        self
    }

    pub fn record_blocks_len_delta(mut self, delta: i64) -> Self {
        self.record_blocks_len_delta = delta;
        self
    }

    fn is_v2(&self) -> bool {
        self.version.parse::<f32>().unwrap() >= 2.0
    }

    fn utf16(&self) -> bool {
        self.attributes
            .iter()
            .any(|(n, v)| n == "Encoding" && v.eq_ignore_ascii_case("UTF-16"))
    }

    /// Encoded text and its length in units, without terminator.
    fn encode_text(&self, text: &str) -> (Vec<u8>, usize) {
        if self.utf16() {
            let units: Vec<u16> = text.encode_utf16().collect();
            (units.iter().flat_map(|u| u.to_le_bytes()).collect(), units.len())
        } else {
            (text.as_bytes().to_vec(), text.len())
        }
    }

    fn terminator(&self) -> &'static [u8] {
        if self.utf16() {
            &[0, 0]
        } else {
            &[0]
        }
    }

    fn header(&self) -> Vec<u8> {
        let mut markup = format!(
            r#"<Dictionary GeneratedByEngineVersion="{0}" RequiredEngineVersion="{0}""#,
            self.version
        );
        for (name, value) in &self.attributes {
            markup.push_str(&format!(r#" {name}="{}""#, escape(value)));
        }
        markup.push_str("/>\r\n");

        let mut body: Vec<u8> = markup.encode_utf16().flat_map(u16::to_le_bytes).collect();
        body.extend_from_slice(&[0, 0]);
        let mut out = (body.len() as u32).to_be_bytes().to_vec();
        out.extend_from_slice(&body);
        out.extend_from_slice(&adler32_slice(&body).to_le_bytes());
        out
    }

    fn key_section(&self) -> Vec<u8> {
        let v2 = self.is_v2();
        let width = if v2 { 8 } else { 4 };
        let per_block = self.keys_per_block.max(1);

        let mut index = Vec::new();
        let mut blocks = Vec::new();
        for chunk in self.keys.chunks(per_block) {
            let mut plain = Vec::new();
            for (offset, text) in chunk {
                push_number(&mut plain, *offset, width);
                plain.extend_from_slice(&self.encode_text(text).0);
                plain.extend_from_slice(self.terminator());
            }
            let block = encode_block(self.key_packing, &plain);

            push_number(&mut index, chunk.len() as u64, width);
            for text in [&chunk[0].1, &chunk[chunk.len() - 1].1] {
                let (bytes, units) = self.encode_text(text);
                if v2 {
                    index.extend_from_slice(&(units as u16).to_be_bytes());
                    index.extend_from_slice(&bytes);
                    index.extend_from_slice(self.terminator());
                } else {
                    index.push(units as u8);
                    index.extend_from_slice(&bytes);
                }
            }
            push_number(&mut index, block.len() as u64, width);
            push_number(&mut index, plain.len() as u64, width);
            blocks.extend_from_slice(&block);
        }

        let index_block = if v2 {
            let mut block = encode_block(Packing::Zlib, &index);
            if self.encrypt_index {
                let key = crypto::key_index_key(&block).unwrap();
                fast_encrypt(&mut block[8..], &key);
            }
            block
        } else {
            index.clone()
        };

        let num_blocks = self.keys.chunks(per_block).count() as u64;
        let mut numbers = Vec::new();
        push_number(&mut numbers, num_blocks, width);
        push_number(&mut numbers, self.keys.len() as u64, width);
        if v2 {
            push_number(&mut numbers, index.len() as u64, width);
        }
        push_number(&mut numbers, index_block.len() as u64, width);
        push_number(&mut numbers, blocks.len() as u64, width);
        let checksum = adler32_slice(&numbers);
        if let Some(key) = &self.passcode_key {
            crypto::salsa20_8(&mut numbers, key);
        }

        let mut out = numbers;
        if v2 {
            out.extend_from_slice(&checksum.to_be_bytes());
        }
        out.extend_from_slice(&index_block);
        out.extend_from_slice(&blocks);
        out
    }

    /// Record section bytes and the offset of its first block within them.
    fn record_section(&self) -> (Vec<u8>, usize) {
        let width = if self.is_v2() { 8 } else { 4 };
        let blocks: Vec<(Vec<u8>, usize)> = self
            .records
            .iter()
            .map(|(packing, plain)| (encode_block(*packing, plain), plain.len()))
            .collect();
        let blocks_len: u64 = blocks.iter().map(|(b, _)| b.len() as u64).sum();

        let mut out = Vec::new();
        push_number(&mut out, blocks.len() as u64, width);
        push_number(&mut out, self.record_entries.unwrap_or(self.keys.len() as u64), width);
        push_number(&mut out, (blocks.len() * 2 * width) as u64, width);
        push_number(&mut out, (blocks_len as i64 + self.record_blocks_len_delta) as u64, width);
        for (block, plain_len) in &blocks {
            push_number(&mut out, block.len() as u64, width);
            push_number(&mut out, *plain_len as u64, width);
        }
        let blocks_start = out.len();
        for (block, _) in &blocks {
            out.extend_from_slice(block);
        }
        (out, blocks_start)
    }

    pub fn build(&self) -> Container {
        let mut bytes = self.header();
        bytes.extend_from_slice(&self.key_section());
        let (records, blocks_start) = self.record_section();
        let record_blocks_offset = bytes.len() + blocks_start;
        bytes.extend_from_slice(&records);
        Container {
            bytes,
            record_blocks_offset,
        }
    }
}
