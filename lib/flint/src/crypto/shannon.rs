//! The Shannon stream cipher with its built-in MAC.
//!
//! A context is keyed once and then re-synchronised with a nonce for every message. Encryption and
//! decryption may be split across any number of calls: partial words are buffered internally so the
//! keystream and the MAC come out the same as for a single call over the whole message.
use byteorder::{ByteOrder, LittleEndian};

const N: usize = 16;
const KEYP: usize = 13;
const INITKONST: u32 = 0x6996_c53a;

#[inline]
fn sbox1(mut w: u32) -> u32 {
    w ^= w.rotate_left(5) | w.rotate_left(7);
    w ^= w.rotate_left(19) | w.rotate_left(22);
    w
}

#[inline]
fn sbox2(mut w: u32) -> u32 {
    w ^= w.rotate_left(7) | w.rotate_left(22);
    w ^= w.rotate_left(5) | w.rotate_left(19);
    w
}

#[derive(Clone)]
pub struct Shannon {
    r: [u32; N],
    crc: [u32; N],
    init_r: [u32; N],
    konst: u32,
    // Keystream word of the current cycle
    sbuf: u32,
    // Partial word accumulated for the MAC
    mbuf: u32,
    // Bits of `sbuf` still unused, zero when word aligned
    nbuf: u32,
}

impl Shannon {
    /// Creates a context keyed with the supplied key.
    pub fn new(key: &[u8]) -> Shannon {
        let mut cipher = Shannon {
            r: [0; N],
            crc: [0; N],
            init_r: [0; N],
            konst: INITKONST,
            sbuf: 0,
            mbuf: 0,
            nbuf: 0,
        };

        // Register starts out as the Fibonacci sequence
        cipher.r[0] = 1;
        cipher.r[1] = 1;
        for i in 2..N {
            cipher.r[i] = cipher.r[i - 1].wrapping_add(cipher.r[i - 2]);
        }

        cipher.load_key(key);
        cipher.konst = cipher.r[0];
        cipher.init_r = cipher.r;

        cipher
    }

    /// Resets the context to the keyed state and folds in the nonce.
    pub fn nonce(&mut self, nonce: &[u8]) {
        self.r = self.init_r;
        self.konst = INITKONST;
        self.load_key(nonce);
        self.konst = self.r[0];
        self.nbuf = 0;
    }

    /// Re-synchronises using a 32 bit sequence number in network byte order.
    #[inline]
    pub fn nonce_u32(&mut self, sequence: u32) {
        self.nonce(&sequence.to_be_bytes())
    }

    /// Encrypts the buffer in place, accumulating the plain text into the MAC.
    pub fn encrypt(&mut self, buf: &mut [u8]) {
        let mut pos = self.drain_buffered(buf, true);

        if pos == buf.len() && self.nbuf != 0 {
            return;
        }

        let words_end = pos + ((buf.len() - pos) & !0x03);

        while pos < words_end {
            self.cycle();
            let word = &mut buf[pos..pos + 4];
            let plain = LittleEndian::read_u32(word);
            self.macfunc(plain);
            LittleEndian::write_u32(word, plain ^ self.sbuf);
            pos += 4;
        }

        if pos < buf.len() {
            self.cycle();
            self.mbuf = 0;
            self.nbuf = 32;
            self.drain_buffered(&mut buf[pos..], true);
        }
    }

    /// Decrypts the buffer in place, accumulating the recovered plain text into the MAC.
    pub fn decrypt(&mut self, buf: &mut [u8]) {
        let mut pos = self.drain_buffered(buf, false);

        if pos == buf.len() && self.nbuf != 0 {
            return;
        }

        let words_end = pos + ((buf.len() - pos) & !0x03);

        while pos < words_end {
            self.cycle();
            let word = &mut buf[pos..pos + 4];
            let plain = LittleEndian::read_u32(word) ^ self.sbuf;
            self.macfunc(plain);
            LittleEndian::write_u32(word, plain);
            pos += 4;
        }

        if pos < buf.len() {
            self.cycle();
            self.mbuf = 0;
            self.nbuf = 32;
            self.drain_buffered(&mut buf[pos..], false);
        }
    }

    /// Closes the message and writes the MAC into the supplied buffer.
    pub fn finish(&mut self, mac: &mut [u8]) {
        // The register was already cycled for a buffered partial word
        if self.nbuf != 0 {
            self.macfunc(self.mbuf);
        }

        self.cycle();
        self.r[KEYP] ^= INITKONST ^ (self.nbuf << 3);
        self.nbuf = 0;

        for i in 0..N {
            self.r[i] ^= self.crc[i];
        }
        self.diffuse();

        for chunk in mac.chunks_mut(4) {
            self.cycle();

            match chunk.len() {
                4 => LittleEndian::write_u32(chunk, self.sbuf),
                _ => {
                    for (i, byte) in chunk.iter_mut().enumerate() {
                        *byte = (self.sbuf >> (8 * i)) as u8;
                    }
                }
            }
        }
    }

    /// Closes the message and compares the MAC against the expected value.
    pub fn verify(&mut self, expected: &[u8]) -> bool {
        let mut mac = vec![0u8; expected.len()];
        self.finish(&mut mac);

        // Constant time
        mac.iter().zip(expected).fold(0u8, |acc, (a, b)| acc | (a ^ b)) == 0
    }

    /// Consumes leftover keystream bytes of a partially used word. Returns the number of bytes
    /// processed and folds the word into the MAC once it is complete.
    fn drain_buffered(&mut self, buf: &mut [u8], encrypting: bool) -> usize {
        if self.nbuf == 0 {
            return 0;
        }

        let mut pos = 0;

        while self.nbuf != 0 && pos < buf.len() {
            let shift = 32 - self.nbuf;

            if encrypting {
                self.mbuf ^= (buf[pos] as u32) << shift;
                buf[pos] ^= (self.sbuf >> shift) as u8;
            } else {
                buf[pos] ^= (self.sbuf >> shift) as u8;
                self.mbuf ^= (buf[pos] as u32) << shift;
            }

            pos += 1;
            self.nbuf -= 8;
        }

        if self.nbuf == 0 {
            self.macfunc(self.mbuf);
        }

        pos
    }

    fn cycle(&mut self) {
        let t = self.r[12] ^ self.r[13] ^ self.konst;
        let t = sbox1(t) ^ self.r[0].rotate_left(1);

        self.r.copy_within(1.., 0);
        self.r[N - 1] = t;

        let t = sbox2(self.r[2] ^ self.r[15]);
        self.r[0] ^= t;
        self.sbuf = t ^ self.r[8] ^ self.r[12];
    }

    #[inline]
    fn crcfunc(&mut self, word: u32) {
        let t = self.crc[0] ^ self.crc[2] ^ self.crc[15] ^ word;
        self.crc.copy_within(1.., 0);
        self.crc[N - 1] = t;
    }

    #[inline]
    fn macfunc(&mut self, word: u32) {
        self.crcfunc(word);
        self.r[KEYP] ^= word;
    }

    #[inline]
    fn diffuse(&mut self) {
        for _ in 0..N {
            self.cycle();
        }
    }

    fn load_key(&mut self, key: &[u8]) {
        for chunk in key.chunks(4) {
            let mut word = [0u8; 4];
            word[..chunk.len()].copy_from_slice(chunk);
            self.r[KEYP] ^= LittleEndian::read_u32(&word);
            self.cycle();
        }

        self.r[KEYP] ^= key.len() as u32;
        self.cycle();

        self.crc = self.r;
        self.diffuse();

        for i in 0..N {
            self.r[i] ^= self.crc[i];
        }
    }
}
