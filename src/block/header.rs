//! ユニットの先頭に書き込まれるワードのエンコード・デコード.
//!
//! 各ユニットの先頭`HEADER_SIZE`バイトには、状態に応じて以下のいずれかが格納される:
//!
//! - 空きユニット: 次の空きユニットのインデックス(フリーリストのリンク)
//! - 割当済みランの先頭ユニット: 検証用マーカーとランの長さ(ユニット数)
//!
//! どちらもネイティブエンディアンの`u32`として格納される.
use byteorder::{ByteOrder, NativeEndian};

/// ランのヘッダのサイズ(バイト単位).
///
/// 利用者に返されるポインタは、ランの先頭からこのサイズ分だけ後ろを指す.
pub const HEADER_SIZE: usize = 4;

/// 一つのランが保持可能な最大のユニット数.
pub const MAX_RUN_UNITS: usize = 0xFFFF;

/// フリーリストの終端を表すリンク値.
pub(crate) const END_OF_LIST: u32 = u32::MAX;

/// 一つのブロックアロケータが管理可能なユニット数の上限.
///
/// リンク値の上位16bitがマーカーと一致することがないように制限している.
pub(crate) const MAX_UNIT_COUNT: usize = (MARKER as usize) << 16;

const MARKER: u32 = 0xB10C;

/// 割当済みランの先頭ユニットに格納されるヘッダ.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunHeader {
    run_units: u16,
}
impl RunHeader {
    /// 新しい`RunHeader`インスタンスを生成する.
    pub fn new(run_units: u16) -> Self {
        RunHeader { run_units }
    }

    /// ランの長さ(ユニット数)を返す.
    pub fn run_units(self) -> usize {
        usize::from(self.run_units)
    }

    /// ヘッダを`buf`の先頭`HEADER_SIZE`バイトに書き込む.
    pub fn write_to(self, buf: &mut [u8]) {
        NativeEndian::write_u32(buf, (MARKER << 16) | u32::from(self.run_units));
    }

    /// `buf`の先頭`HEADER_SIZE`バイトからヘッダを読み込む.
    ///
    /// マーカーが一致しない、ないし長さが`0`の場合には`None`が返される.
    pub fn read_from(buf: &[u8]) -> Option<Self> {
        let word = NativeEndian::read_u32(buf);
        let run_units = (word & 0xFFFF) as u16;
        if word >> 16 != MARKER || run_units == 0 {
            None
        } else {
            Some(RunHeader { run_units })
        }
    }
}

pub(crate) fn write_link(buf: &mut [u8], next: u32) {
    NativeEndian::write_u32(buf, next);
}

pub(crate) fn read_link(buf: &[u8]) -> u32 {
    NativeEndian::read_u32(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_works() {
        let mut buf = [0; HEADER_SIZE];
        RunHeader::new(3).write_to(&mut buf);
        assert_eq!(RunHeader::read_from(&buf), Some(RunHeader::new(3)));
        assert_eq!(RunHeader::read_from(&buf).map(|h| h.run_units()), Some(3));

        RunHeader::new(0xFFFF).write_to(&mut buf);
        assert_eq!(RunHeader::read_from(&buf).map(|h| h.run_units()), Some(0xFFFF));
    }

    #[test]
    fn links_are_never_headers() {
        let mut buf = [0; HEADER_SIZE];
        for &link in &[0, 1, 0xB10C, 0xFFFF, MAX_UNIT_COUNT as u32 - 1, END_OF_LIST] {
            write_link(&mut buf, link);
            assert_eq!(RunHeader::read_from(&buf), None, "link={}", link);
            assert_eq!(read_link(&buf), link);
        }
    }

    #[test]
    fn zero_length_header_is_rejected() {
        let mut buf = [0; HEADER_SIZE];
        NativeEndian::write_u32(&mut buf, MARKER << 16);
        assert_eq!(RunHeader::read_from(&buf), None);
    }
}
