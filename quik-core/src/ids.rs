use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::constants::{DEFAULT_ID_RESOLUTION, MAX_PARTICIPANTS};
use crate::error::IdError;

/// Идентификатор сообщения на проводе
pub type MessageId = i64;

const MIN_RESOLUTION: Duration = Duration::from_millis(1);

/// Генератор строго возрастающих идентификаторов запросов.
///
/// `id = MAX_PARTICIPANTS * tick + participant`, где `tick` - время от Unix-эпохи
/// в единицах `resolution`. Если часы не сдвинулись (или ушли назад), берётся
/// `last + 1`, поэтому последовательность строго растёт при любой частоте вызовов.
#[derive(Debug)]
pub struct IdGenerator {
    resolution: Duration,
    last_tick: Mutex<u64>,
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self {
            resolution: DEFAULT_ID_RESOLUTION,
            last_tick: Mutex::new(0),
        }
    }
}

impl IdGenerator {
    /// Генератор с тиком по умолчанию (10 мс)
    pub fn new() -> Self {
        Self::default()
    }

    /// Генератор с заданным тиком (не мельче 1 мс)
    pub fn with_resolution(resolution: Duration) -> Result<Self, IdError> {
        if resolution < MIN_RESOLUTION {
            return Err(IdError::ResolutionTooFine(resolution));
        }
        Ok(Self {
            resolution,
            last_tick: Mutex::new(0),
        })
    }

    /// Разрешение тика
    pub fn resolution(&self) -> Duration {
        self.resolution
    }

    /// Следующий идентификатор для участника `participant` (< [`MAX_PARTICIPANTS`])
    pub fn next(&self, participant: u32) -> Result<MessageId, IdError> {
        if participant >= MAX_PARTICIPANTS {
            return Err(IdError::ParticipantOutOfRange {
                participant,
                max: MAX_PARTICIPANTS,
            });
        }
        let tick = self.advance(self.current_tick());
        Ok(compose(tick, participant))
    }

    fn current_tick(&self) -> u64 {
        // часы до эпохи -> 0; монотонность всё равно обеспечит advance
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| (d.as_nanos() / self.resolution.as_nanos()) as u64)
            .unwrap_or(0)
    }

    fn advance(&self, tick: u64) -> u64 {
        let mut last = match self.last_tick.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        let issued = if tick <= *last { *last + 1 } else { tick };
        *last = issued;
        issued
    }
}

/// Номер участника, выпустившего идентификатор
pub fn participant_of(id: MessageId) -> u32 {
    id.rem_euclid(i64::from(MAX_PARTICIPANTS)) as u32
}

fn compose(tick: u64, participant: u32) -> MessageId {
    tick as i64 * i64::from(MAX_PARTICIPANTS) + i64::from(participant)
}
