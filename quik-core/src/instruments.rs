use std::collections::BTreeSet;
use std::fmt;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;
use std::str::FromStr;

use crate::error::InstrumentError;

/// Инструмент терминала: код класса + код бумаги
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Instrument {
    /// Код класса (`TQBR`, `SPBFUT`), всегда в верхнем регистре
    pub class_code: String,
    /// Код инструмента как в терминале (`SBER`, `SiH5`)
    pub sec_code: String,
}

impl Instrument {
    /// Конструктор с нормализацией кода класса
    pub fn new(class_code: &str, sec_code: &str) -> Self {
        Self {
            class_code: class_code.trim().to_ascii_uppercase(),
            sec_code: sec_code.trim().to_string(),
        }
    }
}

impl FromStr for Instrument {
    type Err = InstrumentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || InstrumentError::BadFormat(s.to_string());
        let (class, sec) = s.trim().split_once(':').ok_or_else(bad)?;
        let (class, sec) = (class.trim(), sec.trim());

        if class.is_empty() || sec.is_empty() || sec.contains(':') {
            return Err(bad());
        }
        Ok(Instrument::new(class, sec))
    }
}

impl fmt::Display for Instrument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.class_code, self.sec_code)
    }
}

/// Чтение инструментов, по одному `CLASS:SEC` в строке
pub fn read_instruments<R: io::Read>(reader: R) -> Result<Vec<Instrument>, InstrumentError> {
    let mut set = BTreeSet::new();
    let buf = BufReader::new(reader);

    for line in buf.lines() {
        let line = line?;
        if let Some(raw) = normalize_line(&line) {
            set.insert(raw.parse::<Instrument>()?);
        }
    }

    Ok(set.into_iter().collect())
}

/// Чтение инструментов из файла
pub fn read_instruments_from_path(path: impl AsRef<Path>) -> Result<Vec<Instrument>, InstrumentError> {
    let f = File::open(path)?;
    read_instruments(f)
}

fn normalize_line(line: &str) -> Option<&str> {
    // Поддержка inline-комментариев: "TQBR:SBER # comment"
    let s = line.split('#').next().unwrap_or("").trim();
    if s.is_empty() {
        return None;
    }
    Some(s)
}

/// Парсит список из строки вида "TQBR:SBER, SPBFUT:SiH5, ,tqbr:GAZP".
/// Правила:
/// - разделитель: запятая, пустые элементы игнорируются
/// - код класса приводится к верхнему регистру, код бумаги не меняется
/// - результат отсортирован и уникален
pub fn parse_instruments_csv(raw: &str) -> Result<Vec<Instrument>, InstrumentError> {
    let mut set = BTreeSet::new();

    for part in raw.split(',') {
        let t = part.trim();
        if t.is_empty() {
            continue;
        }
        set.insert(t.parse::<Instrument>()?);
    }

    Ok(set.into_iter().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Read};

    fn codes(list: &[Instrument]) -> Vec<String> {
        list.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn parses_class_and_keeps_security_case() {
        let i: Instrument = " spbfut : SiH5 ".parse().unwrap();
        assert_eq!(i.class_code, "SPBFUT");
        assert_eq!(i.sec_code, "SiH5");
        assert_eq!(i.to_string(), "SPBFUT:SiH5");
    }

    #[test]
    fn rejects_malformed_instruments() {
        for raw in ["SBER", ":SBER", "TQBR:", "TQBR:SBER:X", ""] {
            assert!(
                matches!(raw.parse::<Instrument>(), Err(InstrumentError::BadFormat(_))),
                "{raw:?} must be rejected"
            );
        }
    }

    #[test]
    fn csv_sorts_dedups_and_filters_empty() {
        let got = parse_instruments_csv(" tqbr:SBER, SPBFUT:SiH5, ,TQBR:GAZP ,TQBR:SBER,, ").unwrap();
        assert_eq!(codes(&got), vec!["SPBFUT:SiH5", "TQBR:GAZP", "TQBR:SBER"]);

        assert!(parse_instruments_csv(" , ,  ,").unwrap().is_empty());
        assert!(parse_instruments_csv("TQBR:SBER,GAZP").is_err());
    }

    #[test]
    fn normalize_line_ignores_empty_and_comments() {
        assert_eq!(normalize_line(""), None);
        assert_eq!(normalize_line("   # comment"), None);
        assert_eq!(normalize_line("#"), None);
        assert_eq!(normalize_line("TQBR:SBER # blue chip"), Some("TQBR:SBER"));
        assert_eq!(normalize_line("  SPBFUT:SiH5#x  "), Some("SPBFUT:SiH5"));
    }

    #[test]
    fn read_instruments_sorts_and_deduplicates() {
        let input = "\
TQBR:SBER
# futures
spbfut:SiH5   # rouble
  TQBR:SBER

TQBR:GAZP
";
        let got = read_instruments(Cursor::new(input)).unwrap();
        assert_eq!(codes(&got), vec!["SPBFUT:SiH5", "TQBR:GAZP", "TQBR:SBER"]);
    }

    #[test]
    fn read_instruments_reports_bad_line() {
        let err = read_instruments(Cursor::new("TQBR:SBER\nGAZP\n")).unwrap_err();
        assert!(matches!(err, InstrumentError::BadFormat(ref s) if s == "GAZP"));
    }

    #[test]
    fn read_instruments_from_path_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("instruments.txt");
        std::fs::write(&path, "TQBR:SBER\n#comment\ntqbr:SBER\nSPBFUT:RIH5\n").unwrap();

        let got = read_instruments_from_path(&path).unwrap();
        assert_eq!(codes(&got), vec!["SPBFUT:RIH5", "TQBR:SBER"]);

        let missing = read_instruments_from_path(dir.path().join("nope.txt")).unwrap_err();
        assert!(matches!(missing, InstrumentError::Io(_)));
    }

    #[test]
    fn read_instruments_propagates_read_error() {
        // reader, который читает немного, а потом падает
        struct FailingReader {
            inner: Cursor<Vec<u8>>,
            fail_after: usize,
            read_total: usize,
        }

        impl Read for FailingReader {
            fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
                if self.read_total >= self.fail_after {
                    return Err(io::Error::other("boom"));
                }

                let to_read = buf.len().min(self.fail_after - self.read_total);
                let n = self.inner.read(&mut buf[..to_read])?;
                self.read_total += n;
                Ok(n)
            }
        }

        let reader = FailingReader {
            inner: Cursor::new(b"TQBR:SBER\nTQBR:GAZP\n".to_vec()),
            fail_after: 12,
            read_total: 0,
        };

        let err = read_instruments(reader).unwrap_err();
        match err {
            InstrumentError::Io(e) => assert!(e.to_string().contains("boom")),
            other => panic!("unexpected error: {other}"),
        }
    }
}
