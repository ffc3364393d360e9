//! Нарезка TCP-потока на JSON-документы.
//!
//! Терминал не использует разделителей кадров: документ заканчивается там,
//! где закрывается его внешняя фигурная скобка. Декодер ничего не знает о
//! смысле сообщений, он только выдаёт готовые `serde_json::Value`.

use serde_json::Value;

use crate::constants::DEFAULT_MAX_FRAME_BYTES;
use crate::error::FrameError;

/// Инкрементальный декодер: принимает куски произвольной длины,
/// отдаёт документы, как только они целиком пришли.
#[derive(Debug)]
pub struct FrameDecoder {
    buf: Vec<u8>,
    /// сколько байт текущего документа уже просканировано
    pos: usize,
    depth: usize,
    in_string: bool,
    escaped: bool,
    max_len: usize,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDecoder {
    /// Декодер с лимитом буфера по умолчанию
    pub fn new() -> Self {
        Self::with_limit(DEFAULT_MAX_FRAME_BYTES)
    }

    /// Декодер с заданным лимитом незавершённого документа
    pub fn with_limit(max_len: usize) -> Self {
        Self {
            buf: Vec::new(),
            pos: 0,
            depth: 0,
            in_string: false,
            escaped: false,
            max_len,
        }
    }

    /// Сколько байт сейчас лежит в буфере
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Добавляет кусок и возвращает все завершённые документы в порядке прихода.
    ///
    /// Ошибки нарезки возвращаются вперемешку с документами, на своих местах;
    /// после ошибки разбор продолжается со следующего байта.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Result<Value, FrameError>> {
        let mut out = Vec::new();
        if chunk.is_empty() {
            return out;
        }
        self.buf.extend_from_slice(chunk);

        loop {
            if self.pos == 0 && !self.align_to_document(&mut out) {
                break;
            }

            let Some(end) = self.scan() else {
                break;
            };

            let raw: Vec<u8> = self.buf.drain(..=end).collect();
            self.reset_scan();
            match serde_json::from_slice::<Value>(&raw) {
                Ok(doc) => out.push(Ok(doc)),
                Err(source) => out.push(Err(FrameError::Malformed { raw, source })),
            }
        }

        if self.buf.len() > self.max_len {
            out.push(Err(FrameError::Overflow {
                len: self.buf.len(),
                limit: self.max_len,
            }));
            self.buf.clear();
            self.reset_scan();
        }

        out
    }

    /// Отрезает всё до первой `{`. Возвращает false, если начала документа ещё нет.
    fn align_to_document(&mut self, out: &mut Vec<Result<Value, FrameError>>) -> bool {
        match self.buf.iter().position(|&b| b == b'{') {
            Some(0) => true,
            Some(start) => {
                let noise: Vec<u8> = self.buf.drain(..start).collect();
                // пробелы между документами ошибкой не считаем
                if !noise.iter().all(u8::is_ascii_whitespace) {
                    out.push(Err(FrameError::Garbage { bytes: noise }));
                }
                true
            }
            None => {
                // мусор держим до прихода `{`, чтобы сообщить о нём один раз
                if self.buf.iter().all(u8::is_ascii_whitespace) {
                    self.buf.clear();
                }
                false
            }
        }
    }

    /// Продолжает сканирование с места остановки; возвращает индекс закрывающей `}`.
    fn scan(&mut self) -> Option<usize> {
        while self.pos < self.buf.len() {
            let at = self.pos;
            let b = self.buf[at];
            self.pos += 1;

            if self.in_string {
                if self.escaped {
                    self.escaped = false;
                } else if b == b'\\' {
                    self.escaped = true;
                } else if b == b'"' {
                    self.in_string = false;
                }
                continue;
            }

            match b {
                b'"' => self.in_string = true,
                b'{' => self.depth += 1,
                b'}' => {
                    self.depth = self.depth.saturating_sub(1);
                    if self.depth == 0 {
                        return Some(at);
                    }
                }
                _ => {}
            }
        }
        None
    }

    fn reset_scan(&mut self) {
        self.pos = 0;
        self.depth = 0;
        self.in_string = false;
        self.escaped = false;
    }
}
