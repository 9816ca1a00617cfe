use crate::engine::PerCycle;

/// Time-varying model input built from consecutive segments.
///
/// Each segment holds an item and the number of cycles it applies for;
/// [`Schedule::expand`] turns the segments into one item per cycle.
///
/// ```
/// use cohort::schedule::Schedule;
///
/// let phases = Schedule::new().then("combination", 2).then("monotherapy", 18);
/// let per_cycle = phases.expand();
/// assert_eq!(per_cycle.len(), 20);
/// assert_eq!(per_cycle[1], "combination");
/// assert_eq!(per_cycle[2], "monotherapy");
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Schedule<T> {
    segments: Vec<(T, usize)>,
}

impl<T> Default for Schedule<T> {
    fn default() -> Self {
        Self {
            segments: Vec::new(),
        }
    }
}

impl<T: Clone> Schedule<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a segment applying `item` for `cycles` cycles.
    pub fn then(mut self, item: T, cycles: usize) -> Self {
        self.push(item, cycles);
        self
    }

    pub fn push(&mut self, item: T, cycles: usize) {
        self.segments.push((item, cycles));
    }

    pub fn segments(&self) -> &[(T, usize)] {
        &self.segments
    }

    /// Total number of cycles covered by all segments.
    pub fn n_cycles(&self) -> usize {
        self.segments.iter().map(|(_, cycles)| cycles).sum()
    }

    pub fn expand(&self) -> Vec<T> {
        let mut items = Vec::with_capacity(self.n_cycles());
        for (item, cycles) in &self.segments {
            items.extend(std::iter::repeat_n(item, *cycles).cloned());
        }
        items
    }

    /// Convert into a simulator input.
    ///
    /// A schedule with a single non-empty segment becomes
    /// [`PerCycle::Constant`], anything else is expanded.
    pub fn into_per_cycle(self) -> PerCycle<T> {
        let mut non_empty: Vec<_> = self
            .segments
            .iter()
            .filter(|(_, cycles)| *cycles > 0)
            .collect();
        if non_empty.len() == 1 {
            if let Some((item, _)) = non_empty.pop() {
                return PerCycle::Constant(item.clone());
            }
        }
        PerCycle::Varying(self.expand())
    }
}
