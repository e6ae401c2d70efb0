//! In-memory MP4 fixtures for the demux unit tests.

use crate::boxes::*;

/// Build a simple box: [size:u32][type:u32][payload].
pub fn make_box(box_type: u32, payload: &[u8]) -> Vec<u8> {
    let size = (8 + payload.len()) as u32;
    let mut buf = Vec::with_capacity(size as usize);
    buf.extend_from_slice(&size.to_be_bytes());
    buf.extend_from_slice(&box_type.to_be_bytes());
    buf.extend_from_slice(payload);
    buf
}

/// Build a box with a 64-bit extended size header.
pub fn make_box_ext(box_type: u32, payload: &[u8]) -> Vec<u8> {
    let size = (16 + payload.len()) as u64;
    let mut buf = Vec::with_capacity(size as usize);
    buf.extend_from_slice(&1u32.to_be_bytes());
    buf.extend_from_slice(&box_type.to_be_bytes());
    buf.extend_from_slice(&size.to_be_bytes());
    buf.extend_from_slice(payload);
    buf
}

/// Version 0 / zero flags followed by the given fields.
pub fn full_box_payload(fields: &[&[u8]]) -> Vec<u8> {
    let mut buf = vec![0u8; 4];
    for field in fields {
        buf.extend_from_slice(field);
    }
    buf
}

/// Container box from already-built children.
pub fn container(box_type: u32, children: &[Vec<u8>]) -> Vec<u8> {
    make_box(box_type, &children.concat())
}

/// Minimal avcC payload: High profile, level 3.1, 4-byte NAL lengths,
/// one SPS and one PPS.
pub fn avcc_payload() -> Vec<u8> {
    let sps = [0x67, 0x64, 0x00, 0x1F, 0xAC, 0xD9];
    let pps = [0x68, 0xEB, 0xE3, 0xCB];
    let mut p = vec![0x01, 0x64, 0x00, 0x1F, 0xFF, 0xE1];
    p.extend_from_slice(&(sps.len() as u16).to_be_bytes());
    p.extend_from_slice(&sps);
    p.push(1);
    p.extend_from_slice(&(pps.len() as u16).to_be_bytes());
    p.extend_from_slice(&pps);
    p
}

/// Minimal hvcC payload with one VPS/SPS/PPS array.
pub fn hvcc_payload() -> Vec<u8> {
    let mut p = vec![0u8; 23];
    p[0] = 1;
    p[1] = 0x01;
    p[2..6].copy_from_slice(&0x6000_0000u32.to_be_bytes());
    p[6] = 0xB0;
    p[12] = 93;
    p[21] = 0x0F;
    p[22] = 3;
    for (nal_type, nal) in [(32u8, [0x40u8, 0x01]), (33, [0x42, 0x01]), (34, [0x44, 0x01])] {
        p.push(0x80 | nal_type);
        p.extend_from_slice(&1u16.to_be_bytes());
        p.extend_from_slice(&(nal.len() as u16).to_be_bytes());
        p.extend_from_slice(&nal);
    }
    p
}

#[derive(Clone, Debug)]
pub struct FixtureSample {
    pub data: Vec<u8>,
    pub duration: u32,
    pub is_sync: bool,
    pub cts_offset: i32,
}

impl FixtureSample {
    pub fn new(data: Vec<u8>, duration: u32, is_sync: bool) -> Self {
        Self {
            data,
            duration,
            is_sync,
            cts_offset: 0,
        }
    }
}

/// Builder for a single-video-track MP4 (ftyp + moov + mdat).
#[derive(Clone, Debug)]
pub struct Mp4Fixture {
    pub track_id: u32,
    pub sample_entry: u32,
    /// (box type, payload) of the codec configuration box, if any.
    pub config: Option<(u32, Vec<u8>)>,
    pub width: u16,
    pub height: u16,
    pub time_scale: u32,
    pub samples: Vec<FixtureSample>,
    pub samples_per_chunk: usize,
    /// Add a sound track ahead of the video track.
    pub with_audio: bool,
}

impl Mp4Fixture {
    pub fn avc(samples: Vec<FixtureSample>) -> Self {
        Self {
            track_id: 1,
            sample_entry: AVC1,
            config: Some((AVCC, avcc_payload())),
            width: 320,
            height: 240,
            time_scale: 30_000,
            samples,
            samples_per_chunk: 3,
            with_audio: false,
        }
    }

    /// `count` samples of 1001 ticks, sync every `gop` samples.
    pub fn avc_gop(count: usize, gop: usize) -> Self {
        let samples = (0..count)
            .map(|i| FixtureSample::new(vec![i as u8; 10 + i], 1001, i % gop == 0))
            .collect();
        Self::avc(samples)
    }

    pub fn build(&self) -> Vec<u8> {
        let ftyp = make_box(FTYP, b"isom\0\0\x02\0isomavc1");
        // Offsets only change values, not sizes: size the moov first.
        let moov_len = self.moov(0).len();
        let mdat_payload = (ftyp.len() + moov_len + 8) as u64;
        let moov = self.moov(mdat_payload);
        let data: Vec<u8> = self.samples.iter().flat_map(|s| s.data.clone()).collect();

        [ftyp, moov, make_box(MDAT, &data)].concat()
    }

    fn moov(&self, mdat_payload: u64) -> Vec<u8> {
        let mut mvhd = vec![0u8; 100];
        mvhd[12..16].copy_from_slice(&1000u32.to_be_bytes());
        let mut children = vec![make_box(MVHD, &mvhd)];
        if self.with_audio {
            children.push(self.audio_trak());
        }
        children.push(self.video_trak(mdat_payload));
        container(MOOV, &children)
    }

    fn video_trak(&self, mdat_payload: u64) -> Vec<u8> {
        let duration: u64 = self.samples.iter().map(|s| s.duration as u64).sum();
        let stbl = container(
            STBL,
            &[
                self.stsd(),
                self.stts(),
                self.ctts(),
                self.stss(),
                self.stsc(),
                self.stsz(),
                self.stco(mdat_payload),
            ]
            .into_iter()
            .flatten()
            .collect::<Vec<_>>(),
        );
        let minf = container(MINF, &[stbl]);
        let mdia = container(
            MDIA,
            &[
                make_box(MDHD, &mdhd_payload(self.time_scale, duration)),
                make_box(HDLR, &hdlr_payload(VIDE)),
                minf,
            ],
        );
        container(
            TRAK,
            &[
                make_box(TKHD, &tkhd_payload(self.track_id, self.width, self.height)),
                mdia,
            ],
        )
    }

    fn audio_trak(&self) -> Vec<u8> {
        let soun = fourcc(b's', b'o', b'u', b'n');
        let stbl = container(STBL, &[make_box(STSD, &full_box_payload(&[&0u32.to_be_bytes()]))]);
        let mdia = container(
            MDIA,
            &[
                make_box(MDHD, &mdhd_payload(48_000, 0)),
                make_box(HDLR, &hdlr_payload(soun)),
                container(MINF, &[stbl]),
            ],
        );
        container(TRAK, &[make_box(TKHD, &tkhd_payload(9, 0, 0)), mdia])
    }

    fn stsd(&self) -> Option<Vec<u8>> {
        let mut entry = vec![0u8; VISUAL_SAMPLE_ENTRY_SIZE];
        entry[6..8].copy_from_slice(&1u16.to_be_bytes());
        entry[24..26].copy_from_slice(&self.width.to_be_bytes());
        entry[26..28].copy_from_slice(&self.height.to_be_bytes());
        if let Some((box_type, payload)) = &self.config {
            entry.extend_from_slice(&make_box(*box_type, payload));
        }
        let entry = make_box(self.sample_entry, &entry);
        Some(make_box(
            STSD,
            &full_box_payload(&[&1u32.to_be_bytes(), &entry]),
        ))
    }

    fn stts(&self) -> Option<Vec<u8>> {
        let mut fields = Vec::new();
        fields.extend_from_slice(&(self.samples.len() as u32).to_be_bytes());
        for s in &self.samples {
            fields.extend_from_slice(&1u32.to_be_bytes());
            fields.extend_from_slice(&s.duration.to_be_bytes());
        }
        Some(make_box(STTS, &full_box_payload(&[&fields])))
    }

    fn ctts(&self) -> Option<Vec<u8>> {
        if self.samples.iter().all(|s| s.cts_offset == 0) {
            return None;
        }
        let mut payload = vec![1u8, 0, 0, 0];
        payload.extend_from_slice(&(self.samples.len() as u32).to_be_bytes());
        for s in &self.samples {
            payload.extend_from_slice(&1u32.to_be_bytes());
            payload.extend_from_slice(&s.cts_offset.to_be_bytes());
        }
        Some(make_box(CTTS, &payload))
    }

    fn stss(&self) -> Option<Vec<u8>> {
        if self.samples.iter().all(|s| s.is_sync) {
            return None;
        }
        let sync: Vec<u32> = self
            .samples
            .iter()
            .enumerate()
            .filter(|(_, s)| s.is_sync)
            .map(|(i, _)| i as u32 + 1)
            .collect();
        let mut fields = (sync.len() as u32).to_be_bytes().to_vec();
        for n in sync {
            fields.extend_from_slice(&n.to_be_bytes());
        }
        Some(make_box(STSS, &full_box_payload(&[&fields])))
    }

    fn stsc(&self) -> Option<Vec<u8>> {
        Some(make_box(
            STSC,
            &full_box_payload(&[
                &1u32.to_be_bytes(),
                &1u32.to_be_bytes(),
                &(self.samples_per_chunk as u32).to_be_bytes(),
                &1u32.to_be_bytes(),
            ]),
        ))
    }

    fn stsz(&self) -> Option<Vec<u8>> {
        let mut fields = vec![0u8; 4];
        fields.extend_from_slice(&(self.samples.len() as u32).to_be_bytes());
        for s in &self.samples {
            fields.extend_from_slice(&(s.data.len() as u32).to_be_bytes());
        }
        Some(make_box(STSZ, &full_box_payload(&[&fields])))
    }

    fn stco(&self, mdat_payload: u64) -> Option<Vec<u8>> {
        let mut offsets = Vec::new();
        let mut pos = mdat_payload;
        for chunk in self.samples.chunks(self.samples_per_chunk.max(1)) {
            offsets.push(pos as u32);
            pos += chunk.iter().map(|s| s.data.len() as u64).sum::<u64>();
        }
        let mut fields = (offsets.len() as u32).to_be_bytes().to_vec();
        for off in offsets {
            fields.extend_from_slice(&off.to_be_bytes());
        }
        Some(make_box(STCO, &full_box_payload(&[&fields])))
    }
}

pub fn mdhd_payload(time_scale: u32, duration: u64) -> Vec<u8> {
    full_box_payload(&[
        &0u32.to_be_bytes(),
        &0u32.to_be_bytes(),
        &time_scale.to_be_bytes(),
        &(duration as u32).to_be_bytes(),
        &[0x55, 0xC4, 0, 0],
    ])
}

pub fn hdlr_payload(handler: u32) -> Vec<u8> {
    full_box_payload(&[
        &0u32.to_be_bytes(),
        &handler.to_be_bytes(),
        &[0u8; 12],
        b"Handler\0",
    ])
}

pub fn tkhd_payload(track_id: u32, width: u16, height: u16) -> Vec<u8> {
    full_box_payload(&[
        &[0u8; 8],
        &track_id.to_be_bytes(),
        &[0u8; 8],
        &[0u8; 52],
        &((width as u32) << 16).to_be_bytes(),
        &((height as u32) << 16).to_be_bytes(),
    ])
}
