use dashmap::DashMap;
use serde::Serialize;
use std::collections::{HashSet, VecDeque};

/// Default number of values kept per category.
pub const DEFAULT_WINDOW_SIZE: usize = 10;

/// The four number families served by the evaluation service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NumberCategory {
    Prime,
    Fibonacci,
    Even,
    Random,
}

impl NumberCategory {
    pub const ALL: [NumberCategory; 4] = [
        NumberCategory::Prime,
        NumberCategory::Fibonacci,
        NumberCategory::Even,
        NumberCategory::Random,
    ];

    /// Resolves a route id (`p`, `f`, `e`, `r`, any case).
    pub fn from_id(id: &str) -> Option<Self> {
        match id.to_ascii_lowercase().as_str() {
            "p" => Some(NumberCategory::Prime),
            "f" => Some(NumberCategory::Fibonacci),
            "e" => Some(NumberCategory::Even),
            "r" => Some(NumberCategory::Random),
            _ => None,
        }
    }

    pub fn id(self) -> &'static str {
        match self {
            NumberCategory::Prime => "p",
            NumberCategory::Fibonacci => "f",
            NumberCategory::Even => "e",
            NumberCategory::Random => "r",
        }
    }

    /// Upstream endpoint name under `/numbers/`.
    pub fn endpoint(self) -> &'static str {
        match self {
            NumberCategory::Prime => "primes",
            NumberCategory::Fibonacci => "fibo",
            NumberCategory::Even => "even",
            NumberCategory::Random => "rand",
        }
    }
}

/// Fixed-capacity FIFO of distinct integers, oldest first.
#[derive(Debug, Clone)]
pub struct Window {
    values: VecDeque<i64>,
    capacity: usize,
}

impl Window {
    pub fn new(capacity: usize) -> Self {
        Self {
            values: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Appends every incoming value not already held, evicting from the front
    /// once full. Membership is checked against the window as it was before
    /// this call; a value repeated inside `incoming` is taken once.
    /// Returns how many values were admitted.
    pub fn admit(&mut self, incoming: &[i64]) -> usize {
        if self.capacity == 0 {
            return 0;
        }
        let present: HashSet<i64> = self.values.iter().copied().collect();
        let mut taken = HashSet::new();
        let mut admitted = 0;

        for &n in incoming {
            if present.contains(&n) || !taken.insert(n) {
                continue;
            }
            if self.values.len() >= self.capacity {
                self.values.pop_front();
            }
            self.values.push_back(n);
            admitted += 1;
        }
        admitted
    }

    /// Arithmetic mean rounded to two decimals; 0 when empty.
    pub fn average(&self) -> f64 {
        if self.values.is_empty() {
            return 0.0;
        }
        let sum: i128 = self.values.iter().map(|&n| n as i128).sum();
        let mean = sum as f64 / self.values.len() as f64;
        (mean * 100.0).round() / 100.0
    }

    pub fn values(&self) -> Vec<i64> {
        self.values.iter().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// What the numbers endpoint reports for a category.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WindowReport {
    pub numbers: Vec<i64>,
    pub average: f64,
}

/// One window per category. Each update holds the category's shard lock for
/// the whole read-modify-write, so concurrent requests never interleave on
/// the same window.
pub struct WindowStore {
    windows: DashMap<NumberCategory, Window>,
    capacity: usize,
}

impl WindowStore {
    pub fn new(capacity: usize) -> Self {
        let windows = DashMap::new();
        for category in NumberCategory::ALL {
            windows.insert(category, Window::new(capacity));
        }
        Self { windows, capacity }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Admits `incoming` into the category's window and reports the result.
    pub fn update(&self, category: NumberCategory, incoming: &[i64]) -> (WindowReport, usize) {
        let mut window = self
            .windows
            .entry(category)
            .or_insert_with(|| Window::new(self.capacity));
        let admitted = window.admit(incoming);
        let report = WindowReport {
            numbers: window.values(),
            average: window.average(),
        };
        (report, admitted)
    }

    pub fn report(&self, category: NumberCategory) -> WindowReport {
        match self.windows.get(&category) {
            Some(window) => WindowReport {
                numbers: window.values(),
                average: window.average(),
            },
            None => WindowReport {
                numbers: Vec::new(),
                average: 0.0,
            },
        }
    }
}

impl Default for WindowStore {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW_SIZE)
    }
}
