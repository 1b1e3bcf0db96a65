//! Sparse linear systems modulo 3 over packed 2-bit digits.

use bitr::{BitAccess, BitVec, ceiling_div};

/// Low bit of every 2-bit lane.
const LANES_LO: u64 = 0x5555_5555_5555_5555;

/// Adds two words of packed base-3 digits, lane-wise modulo 3, without
/// cross-lane carries. Every lane of both inputs must hold a digit in {0,1,2}.
///
/// Per lane with digits (h,l): the sum tables of the low and high result bit
/// reduce to the boolean forms below; there is no borrow between lanes.
#[inline] pub fn add_mod3(x: u64, y: u64) -> u64 {
    let xl = x & LANES_LO;
    let xh = (x >> 1) & LANES_LO;
    let yl = y & LANES_LO;
    let yh = (y >> 1) & LANES_LO;
    let lo = ((xl ^ yl) & !xh & !yh) | (xh & yh);
    let hi = (xh & !yh & !yl) | (yh & !xh & !xl) | (xl & yl);
    (hi << 1) | lo
}

/// Negates a word of packed base-3 digits lane-wise (1 and 2 swap, 0 stays),
/// i.e. multiplies every digit by 2 modulo 3.
#[inline] pub fn neg_mod3(x: u64) -> u64 {
    ((x & LANES_LO) << 1) | ((x >> 1) & LANES_LO)
}

/// Subtracts two words of packed base-3 digits, lane-wise modulo 3.
/// Every lane of both inputs must hold a digit in {0,1,2}.
#[inline] pub fn sub_mod3(x: u64, y: u64) -> u64 {
    add_mod3(x, neg_mod3(y))
}

/// An equation modulo 3: packed 2-bit coefficients (each in {1,2}) over a
/// fixed number of variables, and a constant in {0,1,2}.
#[derive(Clone)]
pub struct Modulo3Equation {
    coeffs: Box<[u64]>,
    constant: u8,
}

impl Modulo3Equation {
    /// Returns an equation `0 = constant` over `num_vars` variables.
    pub fn new(num_vars: usize, constant: u8) -> Self {
        assert!(constant < 3, "constant {constant} is not a digit modulo 3");
        Self { coeffs: Box::with_zeroed_bits(2 * num_vars.max(1)), constant }
    }

    /// Returns the constant.
    #[inline] pub fn constant(&self) -> u8 { self.constant }

    /// Adds the term `coeff * var`. The variable must not be present yet and
    /// the coefficient must be 1 or 2.
    pub fn add_term(&mut self, var: usize, coeff: u8) -> &mut Self {
        assert!(coeff == 1 || coeff == 2, "coefficient {coeff} is not invertible modulo 3");
        assert_eq!(self.coeffs.get_fragment(var, 2), 0, "variable {var} is already present");
        self.coeffs.init_fragment(var, coeff as u64, 2);
        self
    }

    /// Returns the coefficient of `var` (0 if absent).
    #[inline] pub fn coeff(&self, var: usize) -> u8 {
        self.coeffs.get_fragment(var, 2) as u8
    }

    /// Returns the lowest variable with a nonzero coefficient.
    pub fn first_var(&self) -> Option<usize> {
        for (nr, w) in self.coeffs.iter().enumerate() {
            if *w != 0 { return Some(nr * 32 + w.trailing_zeros() as usize / 2); }
        }
        None
    }

    /// Returns whether all coefficients are zero.
    pub fn is_zero(&self) -> bool {
        self.coeffs.iter().all(|w| *w == 0)
    }

    /// Calls `f(var, coeff)` for every term.
    pub fn for_each_term(&self, mut f: impl FnMut(usize, u8)) {
        for (nr, w) in self.coeffs.iter().enumerate() {
            let mut w = *w;
            while w != 0 {
                let lane = w.trailing_zeros() as usize / 2;
                f(nr * 32 + lane, ((w >> (2 * lane)) & 3) as u8);
                w &= !(3 << (2 * lane));
            }
        }
    }

    /// Adds `other` to `self`, lane-wise modulo 3.
    pub fn add_assign(&mut self, other: &Self) {
        for (a, b) in self.coeffs.iter_mut().zip(other.coeffs.iter()) {
            *a = add_mod3(*a, *b);
        }
        self.constant = (self.constant + other.constant) % 3;
    }

    /// Subtracts `other` from `self`, lane-wise modulo 3.
    pub fn sub_assign(&mut self, other: &Self) {
        for (a, b) in self.coeffs.iter_mut().zip(other.coeffs.iter()) {
            *a = sub_mod3(*a, *b);
        }
        self.constant = (self.constant + 3 - other.constant) % 3;
    }

    /// Evaluates the left side under `solution` (packed 2-bit digits),
    /// skipping `skip_var` if given.
    fn eval_excluding(&self, solution: &[u64], skip_var: Option<usize>) -> u8 {
        let mut acc = 0u32;
        self.for_each_term(|var, coeff| {
            if Some(var) != skip_var {
                acc += coeff as u32 * solution.get_fragment(var, 2) as u32;
            }
        });
        (acc % 3) as u8
    }

    /// Returns whether `solution` (packed 2-bit digits) satisfies the equation.
    pub fn satisfied_by(&self, solution: &[u64]) -> bool {
        self.eval_excluding(solution, None) == self.constant
    }

    /// Assigns `var` in `solution` so that the equation becomes satisfied,
    /// assuming all its other variables are already assigned.
    fn solve_for(&self, var: usize, solution: &mut [u64]) {
        let rest = self.eval_excluding(solution, Some(var));
        // inverses modulo 3 are the coefficients themselves
        let digit = (self.coeff(var) as u32 * (3 + self.constant as u32 - rest as u32)) % 3;
        solution.set_fragment(var, digit as u64, 2);
    }
}

/// A system of equations modulo 3.
///
/// Solved either by dense Gaussian elimination ([`Self::try_solve_dense`]) or
/// by lazy elimination ([`Self::try_solve`]): variables of degree 1 are
/// repeatedly eliminated for free, and only the residual core (empty for
/// sufficiently sparse systems) goes through dense elimination. Both report
/// `None` exactly when the system is unsolvable; for a given equation order
/// the returned assignment is deterministic.
///
/// The approach follows:
/// - M. Genuzio, G. Ottaviano, S. Vigna, "Fast Scalable Construction of
///   (Minimal Perfect Hash) Functions", SEA 2016.
pub struct Modulo3System {
    num_vars: usize,
    equations: Vec<Modulo3Equation>,
}

impl Modulo3System {
    /// Returns an empty system over `num_vars` variables.
    pub fn new(num_vars: usize) -> Self {
        Self { num_vars, equations: Vec::new() }
    }

    /// Adds an equation, which must be over the same number of variables.
    pub fn add(&mut self, equation: Modulo3Equation) {
        debug_assert_eq!(equation.coeffs.len(), ceiling_div(2 * self.num_vars.max(1), 64));
        self.equations.push(equation);
    }

    /// Returns the number of variables.
    #[inline] pub fn num_vars(&self) -> usize { self.num_vars }

    /// Returns the number of equations.
    #[inline] pub fn num_equations(&self) -> usize { self.equations.len() }

    /// Returns whether `solution` satisfies every equation.
    pub fn satisfied_by(&self, solution: &[u64]) -> bool {
        self.equations.iter().all(|e| e.satisfied_by(solution))
    }

    /// Solves by dense Gaussian elimination.
    /// Returns the packed 2-bit assignment, or [`None`] for an unsolvable system.
    pub fn try_solve_dense(&self) -> Option<Box<[u64]>> {
        let mut solution = Box::with_zeroed_bits(2 * self.num_vars.max(1));
        self.solve_dense_into(self.equations.clone(), &mut solution).then_some(solution)
    }

    /// Reduces `eqs` to echelon form and back-substitutes into `solution`,
    /// leaving variables absent from the system untouched.
    fn solve_dense_into(&self, mut eqs: Vec<Modulo3Equation>, solution: &mut [u64]) -> bool {
        let mut pivots: Vec<(usize, usize)> = Vec::new();    // (equation, variable)
        for i in 0..eqs.len() {
            for &(j, var) in &pivots {
                let c = eqs[i].coeff(var);
                if c != 0 {
                    let row = eqs[j].clone();
                    // equal coefficients cancel by subtraction, opposite ones by addition
                    if c == row.coeff(var) { eqs[i].sub_assign(&row) } else { eqs[i].add_assign(&row) }
                }
            }
            match eqs[i].first_var() {
                Some(var) => pivots.push((i, var)),
                None => if eqs[i].constant != 0 { return false; },
            }
        }
        for &(i, var) in pivots.iter().rev() {
            eqs[i].solve_for(var, solution);
        }
        true
    }

    /// Solves by lazy elimination with a dense fallback for the residual core.
    /// Returns the packed 2-bit assignment, or [`None`] for an unsolvable system.
    pub fn try_solve(&self) -> Option<Box<[u64]>> {
        let mut degree = vec![0u32; self.num_vars];
        let mut incident = vec![0u32; self.num_vars];    // xor of incident equation indices
        for (e, eq) in self.equations.iter().enumerate() {
            eq.for_each_term(|var, _| {
                degree[var] += 1;
                incident[var] ^= e as u32;
            });
        }
        let mut alive = vec![true; self.equations.len()];
        let mut order: Vec<(u32, u32)> = Vec::new();     // (equation, variable) in peel order
        let mut peel = |var: usize, degree: &mut Vec<u32>, incident: &mut Vec<u32>,
                        alive: &mut Vec<bool>, order: &mut Vec<(u32, u32)>| {
            if degree[var] != 1 { return; }
            let e = incident[var] as usize;
            alive[e] = false;
            self.equations[e].for_each_term(|u, _| {
                degree[u] -= 1;
                incident[u] ^= e as u32;
            });
            order.push((e as u32, var as u32));
        };
        for var in 0..self.num_vars {
            peel(var, &mut degree, &mut incident, &mut alive, &mut order);
        }
        let mut i = 0;
        while i < order.len() {
            let eq = order[i].0 as usize;
            let vars: Vec<usize> = {
                let mut vs = Vec::with_capacity(3);
                self.equations[eq].for_each_term(|u, _| vs.push(u));
                vs
            };
            for var in vars {
                peel(var, &mut degree, &mut incident, &mut alive, &mut order);
            }
            i += 1;
        }

        let mut solution = Box::with_zeroed_bits(2 * self.num_vars.max(1));
        let core: Vec<Modulo3Equation> = self.equations.iter().zip(alive.iter())
            .filter_map(|(eq, alive)| alive.then(|| eq.clone())).collect();
        if !self.solve_dense_into(core, &mut solution) { return None; }
        for &(e, var) in order.iter().rev() {
            self.equations[e as usize].solve_for(var as usize, &mut solution);
        }
        Some(solution)
    }
}
