//! Распознавание жестов по 21 точке кисти.
//!
//! `classify` — чистая функция над одним кадром. `GestureDebouncer` добавляет
//! одно окно охлаждения на сессию: после выдачи символа до истечения окна не
//! выдаётся ничего, даже другой символ.

use std::fmt;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Сколько точек детектор выдаёт на одну кисть
pub const LANDMARK_COUNT: usize = 21;

const WRIST: usize = 0;
const THUMB_MCP: usize = 2;
const THUMB_IP: usize = 3;
const THUMB_TIP: usize = 4;
const INDEX_TIP: usize = 8;
const MIDDLE_TIP: usize = 12;
const RING_TIP: usize = 16;
const PINKY_TIP: usize = 20;

/// Расстояние кончик большого — кончик указательного, считающееся касанием
const TOUCH_DISTANCE: f32 = 0.06;
/// Раскрытая ладонь: расстояние между кончиками указательного и мизинца
const PALM_SPREAD: f32 = 0.15;

/// Нормализованная координата кадра; y растёт вниз
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    fn dist(&self, other: &Point) -> f32 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }
}

/// Поза одной кисти в одном кадре детектора
#[derive(Debug, Clone, PartialEq, Default)]
pub struct LandmarkFrame {
    points: Vec<Point>,
}

impl LandmarkFrame {
    pub fn new(points: Vec<Point>) -> Self {
        Self { points }
    }

    pub fn points(&self) -> &[Point] {
        &self.points
    }

    pub fn is_complete(&self) -> bool {
        self.points.len() >= LANDMARK_COUNT
    }

    fn at(&self, i: usize) -> &Point {
        &self.points[i]
    }

    /// Палец согнут: кончик ниже сустава на две точки ближе к ладони
    fn folded(&self, tip: usize) -> bool {
        self.at(tip).y > self.at(tip - 2).y
    }

    fn extended(&self, tip: usize) -> bool {
        !self.folded(tip)
    }

    fn thumb_out_left(&self) -> bool {
        self.at(THUMB_TIP).x < self.at(THUMB_IP).x
    }

    fn thumb_raised(&self) -> bool {
        self.at(THUMB_TIP).y < self.at(THUMB_IP).y
    }
}

/// Распознанный символ
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Symbol {
    A,
    B,
    L,
    V,
    W,
    Y,
    I,
    O,
    Yes,
    No,
    Hello,
}

impl Symbol {
    /// Метка для отправки и озвучивания
    pub fn label(&self) -> &'static str {
        match self {
            Symbol::A => "A",
            Symbol::B => "B",
            Symbol::L => "L",
            Symbol::V => "V",
            Symbol::W => "W",
            Symbol::Y => "Y",
            Symbol::I => "I",
            Symbol::O => "O",
            Symbol::Yes => "YES",
            Symbol::No => "NO",
            Symbol::Hello => "HELLO",
        }
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

type Predicate = fn(&LandmarkFrame) -> bool;

/// Таблица букв по приоритету: побеждает первая подходящая
const LETTERS: &[(Symbol, Predicate)] = &[
    (Symbol::A, |lm| {
        lm.folded(INDEX_TIP)
            && lm.folded(MIDDLE_TIP)
            && lm.folded(RING_TIP)
            && lm.folded(PINKY_TIP)
            && lm.thumb_raised()
    }),
    (Symbol::B, |lm| {
        lm.extended(INDEX_TIP)
            && lm.extended(MIDDLE_TIP)
            && lm.extended(RING_TIP)
            && lm.extended(PINKY_TIP)
    }),
    (Symbol::L, |lm| {
        lm.extended(INDEX_TIP)
            && lm.folded(MIDDLE_TIP)
            && lm.folded(RING_TIP)
            && lm.folded(PINKY_TIP)
            && lm.thumb_out_left()
    }),
    (Symbol::V, |lm| {
        lm.extended(INDEX_TIP)
            && lm.extended(MIDDLE_TIP)
            && lm.folded(RING_TIP)
            && lm.folded(PINKY_TIP)
    }),
    (Symbol::W, |lm| {
        lm.extended(INDEX_TIP)
            && lm.extended(MIDDLE_TIP)
            && lm.extended(RING_TIP)
            && lm.folded(PINKY_TIP)
    }),
    (Symbol::Y, |lm| {
        lm.folded(INDEX_TIP)
            && lm.folded(MIDDLE_TIP)
            && lm.folded(RING_TIP)
            && lm.extended(PINKY_TIP)
            && lm.thumb_out_left()
    }),
    (Symbol::I, |lm| {
        lm.folded(INDEX_TIP)
            && lm.folded(MIDDLE_TIP)
            && lm.folded(RING_TIP)
            && lm.extended(PINKY_TIP)
    }),
    (Symbol::O, |lm| {
        lm.at(THUMB_TIP).dist(lm.at(INDEX_TIP)) < TOUCH_DISTANCE
            && lm.folded(MIDDLE_TIP)
            && lm.folded(RING_TIP)
            && lm.folded(PINKY_TIP)
    }),
];

/// Грубые эвристики, если ни одна буква не подошла
const FALLBACKS: &[(Symbol, Predicate)] = &[
    (Symbol::Yes, |lm| {
        lm.thumb_raised() && lm.at(THUMB_TIP).y < lm.at(THUMB_MCP).y
    }),
    (Symbol::No, |lm| {
        lm.at(THUMB_TIP).y > lm.at(THUMB_IP).y
            && lm.at(THUMB_IP).y > lm.at(THUMB_MCP).y
            && lm.at(THUMB_TIP).y > lm.at(WRIST).y
    }),
    (Symbol::Hello, |lm| {
        [INDEX_TIP, MIDDLE_TIP, RING_TIP, PINKY_TIP]
            .iter()
            .all(|&tip| lm.at(tip).y < lm.at(WRIST).y)
            && lm.at(INDEX_TIP).dist(lm.at(PINKY_TIP)) > PALM_SPREAD
    }),
];

/// Классифицирует кадр; неполный кадр даёт `None`
pub fn classify(frame: &LandmarkFrame) -> Option<Symbol> {
    if !frame.is_complete() {
        return None;
    }

    LETTERS
        .iter()
        .chain(FALLBACKS.iter())
        .find(|(_, check)| check(frame))
        .map(|(symbol, _)| *symbol)
}

/// Локальное озвучивание, например синтез речи
pub trait Announcer: Send + Sync {
    fn announce(&self, text: &str);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GestureState {
    pub last_symbol: Option<Symbol>,
    pub cooling: bool,
}

/// Подавление повторов с одним окном охлаждения.
///
/// Таймер не запускается отдельной задачей: владелец ждёт `deadline()` в своём
/// цикле и вызывает `expire`. Истёкшее окно учитывается и лениво, при
/// следующем кадре.
#[derive(Debug)]
pub struct GestureDebouncer {
    state: GestureState,
    cooldown: Duration,
    deadline: Option<Instant>,
}

impl GestureDebouncer {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            state: GestureState::default(),
            cooldown,
            deadline: None,
        }
    }

    pub fn state(&self) -> GestureState {
        if self.elapsed(Instant::now()) {
            return GestureState::default();
        }
        self.state
    }

    /// Конец текущего окна охлаждения
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    fn elapsed(&self, now: Instant) -> bool {
        self.deadline.is_some_and(|deadline| now >= deadline)
    }

    /// Обрабатывает один тик детектора. Классифицируется только первая кисть.
    /// Возвращает символ для выдачи и открывает окно охлаждения.
    pub fn on_frame_result(&mut self, hands: &[LandmarkFrame]) -> Option<Symbol> {
        let now = Instant::now();
        if self.elapsed(now) {
            self.expire();
        }

        let symbol = classify(hands.first()?)?;
        if self.state.cooling || self.state.last_symbol == Some(symbol) {
            return None;
        }

        debug!("Gesture detected: {}", symbol);
        self.state = GestureState {
            last_symbol: Some(symbol),
            cooling: true,
        };
        self.deadline = Some(now + self.cooldown);
        Some(symbol)
    }

    /// Окно истекло: сбрасывает состояние
    pub fn expire(&mut self) {
        if self.deadline.take().is_some() {
            debug!("Gesture cooldown over");
        }
        self.state = GestureState::default();
    }

    /// Отменяет окно охлаждения (hangup)
    pub fn cancel(&mut self) {
        self.deadline = None;
        self.state = GestureState::default();
    }
}
