//! Local MaxSAT repair of flipped faces.
//!
//! Around the faces that still have negative lattice area, every jump
//! component whose edge lies inside the patch becomes a variable with domain
//! `{-1, 0, 1}`, one-hot encoded in three booleans. Hard clauses keep every
//! patch face closed; soft clauses forbid negative area and, with unit
//! weight, prefer the current values. The problem is written as weighted CNF
//! and handed to an external MaxSAT solver.

use std::collections::{BTreeMap, VecDeque};
use std::io::{BufWriter, Read, Seek, SeekFrom, Write};
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use crate::algo::field_math::{lattice_cross, rshift90, Vec2i};
use crate::algo::optimizer::coefficient;
use crate::error::{MeshError, Result};
use crate::mesh::LatticeMesh;

/// Weighted CNF formula.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Wcnf {
    /// Number of boolean variables (1-based in clauses).
    pub num_vars: usize,
    /// Clauses with their weight; `None` marks a hard clause.
    pub clauses: Vec<(Option<u64>, Vec<i32>)>,
}

impl Wcnf {
    /// Empty formula over `num_vars` variables.
    pub fn new(num_vars: usize) -> Self {
        Self {
            num_vars,
            clauses: Vec::new(),
        }
    }

    /// Add a clause that must hold.
    pub fn add_hard(&mut self, lits: Vec<i32>) {
        self.clauses.push((None, lits));
    }

    /// Add a clause violated at cost `weight`.
    pub fn add_soft(&mut self, weight: u64, lits: Vec<i32>) {
        self.clauses.push((Some(weight), lits));
    }

    /// Weight given to hard clauses: one more than all soft weights together.
    pub fn top(&self) -> u64 {
        1 + self.clauses.iter().filter_map(|(w, _)| *w).sum::<u64>()
    }

    /// Write in the DIMACS WCNF format.
    pub fn write<W: Write>(&self, out: W) -> std::io::Result<()> {
        let mut out = BufWriter::new(out);
        let top = self.top();
        writeln!(out, "p wcnf {} {} {}", self.num_vars, self.clauses.len(), top)?;
        for (weight, lits) in &self.clauses {
            write!(out, "{}", weight.unwrap_or(top))?;
            for lit in lits {
                write!(out, " {}", lit)?;
            }
            writeln!(out, " 0")?;
        }
        out.flush()
    }

    /// Whether an assignment (indexed by variable, 1-based) satisfies every
    /// hard clause.
    pub fn hard_satisfied(&self, model: &[bool]) -> bool {
        self.clauses.iter().filter(|(w, _)| w.is_none()).all(|(_, lits)| {
            lits.iter().any(|&l| {
                let v = l.unsigned_abs() as usize;
                model.get(v).copied().unwrap_or(false) == (l > 0)
            })
        })
    }
}

/// Result of a solver run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SatOutcome {
    /// A model, indexed by variable (entry 0 unused).
    Sat(Vec<bool>),
    /// The hard clauses cannot be satisfied.
    Unsat,
    /// The solver did not finish in time.
    Timeout,
}

/// External MaxSAT solver invocation.
#[derive(Debug, Clone)]
pub struct SatSolver {
    /// Executable.
    pub program: PathBuf,
    /// Arguments placed before the formula path.
    pub args: Vec<String>,
    /// Wall-clock limit.
    pub timeout: Duration,
}

impl Default for SatSolver {
    fn default() -> Self {
        Self {
            program: PathBuf::from("open-wbo"),
            args: Vec::new(),
            timeout: Duration::from_secs(60),
        }
    }
}

impl SatSolver {
    /// Solver at `program` with the default timeout.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    /// Set the wall-clock limit.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the arguments placed before the formula path.
    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    /// Write `formula` to a scoped temporary file, run the solver on it and
    /// parse its answer.
    pub fn solve(&self, formula: &Wcnf) -> Result<SatOutcome> {
        let mut input = tempfile::Builder::new().prefix("quadriflow-").suffix(".wcnf").tempfile()?;
        formula.write(input.as_file_mut())?;
        let mut output = tempfile::tempfile()?;

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .arg(input.path())
            .stdin(Stdio::null())
            .stdout(Stdio::from(output.try_clone()?))
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| MeshError::SatSolver(format!("cannot run {}: {}", self.program.display(), e)))?;

        let start = Instant::now();
        loop {
            if child.try_wait()?.is_some() {
                break;
            }
            if start.elapsed() >= self.timeout {
                child.kill().ok();
                child.wait().ok();
                log::warn!("SAT solver timed out after {:.1?}", self.timeout);
                return Ok(SatOutcome::Timeout);
            }
            std::thread::sleep(Duration::from_millis(10));
        }

        let mut text = String::new();
        output.seek(SeekFrom::Start(0))?;
        output.read_to_string(&mut text)?;
        parse_solver_output(&text, formula.num_vars)
    }
}

/// Parse `s` and `v` lines of a (Max)SAT solver.
///
/// Accepts models as signed literals or as a single 0/1 string.
pub fn parse_solver_output(text: &str, num_vars: usize) -> Result<SatOutcome> {
    let mut status = None;
    let mut model = vec![false; num_vars + 1];
    for line in text.lines() {
        let line = line.trim();
        if let Some(rest) = line.strip_prefix("s ") {
            let rest = rest.trim();
            status = Some(if rest.starts_with("UNSAT") {
                false
            } else if rest.starts_with("OPTIMUM") || rest.starts_with("SAT") {
                true
            } else {
                return Err(MeshError::SatSolver(format!("unknown status line: {}", line)));
            });
        } else if let Some(rest) = line.strip_prefix("v ") {
            let tokens: Vec<&str> = rest.split_whitespace().collect();
            if tokens.len() == 1 && tokens[0].chars().all(|c| c == '0' || c == '1') && tokens[0].len() > 1 {
                for (i, c) in tokens[0].chars().enumerate() {
                    if i < num_vars {
                        model[i + 1] = c == '1';
                    }
                }
                continue;
            }
            for token in tokens {
                let lit: i64 = token
                    .parse()
                    .map_err(|_| MeshError::SatSolver(format!("bad literal {:?}", token)))?;
                let v = lit.unsigned_abs() as usize;
                if v >= 1 && v <= num_vars {
                    model[v] = lit > 0;
                }
            }
        }
    }
    match status {
        Some(true) => Ok(SatOutcome::Sat(model)),
        Some(false) => Ok(SatOutcome::Unsat),
        None => Err(MeshError::SatSolver("no status line in solver output".to_string())),
    }
}

/// Boolean for "variable `i` takes value `val`" (`val` in `-1..=1`).
#[inline]
pub fn value_literal(i: usize, val: i32) -> i32 {
    (3 * i) as i32 + (val + 1) + 1
}

/// A patch problem: its formula and the jump components it may change.
#[derive(Debug, Clone)]
pub struct PatchProblem {
    /// The formula.
    pub formula: Wcnf,
    /// `(edge, component)` of each variable.
    pub variables: Vec<(usize, usize)>,
    /// Faces whose closure is enforced.
    pub faces: Vec<usize>,
}

/// Faces within `rings` face-adjacency steps of `seeds`.
pub fn grow_patch(mesh: &LatticeMesh, e2f: &[Vec<(usize, usize)>], seeds: &[usize], rings: usize) -> Vec<usize> {
    let mut dist = vec![usize::MAX; mesh.num_faces()];
    let mut queue = VecDeque::new();
    for &f in seeds {
        dist[f] = 0;
        queue.push_back(f);
    }
    while let Some(f) = queue.pop_front() {
        if dist[f] == rings {
            continue;
        }
        for &e in &mesh.f2e[f] {
            for &(g, _) in &e2f[e] {
                if dist[g] == usize::MAX {
                    dist[g] = dist[f] + 1;
                    queue.push_back(g);
                }
            }
        }
    }
    (0..mesh.num_faces()).filter(|&f| dist[f] != usize::MAX).collect()
}

/// Build the MaxSAT problem for a patch of faces.
pub fn build_patch_problem(mesh: &LatticeMesh, e2f: &[Vec<(usize, usize)>], patch: &[usize]) -> PatchProblem {
    let mut inside = vec![false; mesh.num_faces()];
    for &f in patch {
        inside[f] = true;
    }
    let mut var_of: BTreeMap<(usize, usize), usize> = BTreeMap::new();
    let mut variables = Vec::new();
    for &f in patch {
        for &e in &mesh.f2e[f] {
            if !e2f[e].iter().all(|&(g, _)| inside[g]) {
                continue;
            }
            for comp in 0..2 {
                if !mesh.allow_change[e][comp] || mesh.diff[e][comp].abs() > 1 || var_of.contains_key(&(e, comp)) {
                    continue;
                }
                var_of.insert((e, comp), variables.len());
                variables.push((e, comp));
            }
        }
    }

    let mut formula = Wcnf::new(3 * variables.len());
    for i in 0..variables.len() {
        let [a, b, c] = [-1, 0, 1].map(|v| value_literal(i, v));
        formula.add_hard(vec![a, b, c]);
        formula.add_hard(vec![-a, -b]);
        formula.add_hard(vec![-a, -c]);
        formula.add_hard(vec![-b, -c]);
    }

    // Closure of every face and axis.
    for &f in patch {
        for axis in 0..2 {
            let mut constant = 0;
            let mut terms: Vec<(usize, i32)> = Vec::new();
            for k in 0..3 {
                let e = mesh.f2e[f][k];
                for comp in 0..2 {
                    let (a, sign) = coefficient(mesh.fq[f][k], comp);
                    if a != axis {
                        continue;
                    }
                    match var_of.get(&(e, comp)) {
                        Some(&var) => terms.push((var, sign)),
                        None => constant += sign * mesh.diff[e][comp],
                    }
                }
            }
            if terms.is_empty() {
                continue;
            }
            for_each_assignment(terms.len(), |vals| {
                let sum: i32 = constant + terms.iter().zip(vals).map(|(&(_, s), &v)| s * v).sum::<i32>();
                if sum != 0 {
                    let clause = terms.iter().zip(vals).map(|(&(var, _), &v)| -value_literal(var, v)).collect();
                    formula.add_hard(clause);
                }
            });
        }
    }

    // Negative area is expensive; keeping values is cheap.
    let area_weight = variables.len() as u64 + 1;
    for &f in patch {
        let sides = [mesh.f2e[f][0], mesh.f2e[f][1]];
        let mut involved: Vec<(usize, usize, usize)> = Vec::new();
        for (slot, &e) in sides.iter().enumerate() {
            for comp in 0..2 {
                if let Some(&var) = var_of.get(&(e, comp)) {
                    involved.push((slot, comp, var));
                }
            }
        }
        for_each_assignment(involved.len(), |vals| {
            let mut d = [mesh.diff[sides[0]], mesh.diff[sides[1]]];
            for (&(slot, comp, _), &v) in involved.iter().zip(vals) {
                d[slot][comp] = v;
            }
            let area = lattice_cross(rshift90(d[0], mesh.fq[f][0]), rshift90(d[1], mesh.fq[f][1]));
            if area < 0 {
                let clause = involved.iter().zip(vals).map(|(&(_, _, var), &v)| -value_literal(var, v)).collect();
                formula.add_soft(area_weight, clause);
            }
        });
    }
    for (i, &(e, comp)) in variables.iter().enumerate() {
        formula.add_soft(1, vec![value_literal(i, mesh.diff[e][comp])]);
    }

    PatchProblem {
        formula,
        variables,
        faces: patch.to_vec(),
    }
}

/// Call `visit` with every assignment of `{-1, 0, 1}` to `n` slots.
fn for_each_assignment(n: usize, mut visit: impl FnMut(&[i32])) {
    let mut vals = vec![-1; n];
    loop {
        visit(&vals);
        let mut k = 0;
        while k < n {
            if vals[k] < 1 {
                vals[k] += 1;
                break;
            }
            vals[k] = -1;
            k += 1;
        }
        if k == n {
            return;
        }
    }
}

/// Decode a model into jump values. `None` if a one-hot group is broken.
pub fn decode_model(problem: &PatchProblem, model: &[bool]) -> Option<Vec<i32>> {
    (0..problem.variables.len())
        .map(|i| {
            let set: Vec<i32> = [-1, 0, 1]
                .into_iter()
                .filter(|&v| model.get(value_literal(i, v) as usize).copied().unwrap_or(false))
                .collect();
            (set.len() == 1).then(|| set[0])
        })
        .collect()
}

/// Sweep patch sizes `1..=max_rings` around the flipped faces and apply every
/// solver answer that keeps all faces closed and reduces the flip count.
///
/// Returns the number of flipped faces removed. A missing or failing solver
/// is reported as [`MeshError::SatSolver`].
pub fn fix_flip_sat(mesh: &mut LatticeMesh, solver: &SatSolver, max_rings: usize) -> Result<usize> {
    let e2f = mesh.edge_faces();
    let initial = mesh.flipped_faces().len();
    for rings in 1..=max_rings {
        let flipped = mesh.flipped_faces();
        if flipped.is_empty() {
            break;
        }
        let patch = grow_patch(mesh, &e2f, &flipped, rings);
        let problem = build_patch_problem(mesh, &e2f, &patch);
        if problem.variables.is_empty() {
            continue;
        }
        log::debug!(
            "SAT patch ring {}: {} faces, {} variables, {} clauses",
            rings,
            patch.len(),
            problem.variables.len(),
            problem.formula.clauses.len()
        );
        let model = match solver.solve(&problem.formula)? {
            SatOutcome::Sat(model) => model,
            SatOutcome::Unsat => {
                log::debug!("SAT patch ring {} is unsatisfiable", rings);
                continue;
            }
            SatOutcome::Timeout => continue,
        };
        let Some(values) = decode_model(&problem, &model) else {
            log::warn!("SAT model breaks a one-hot group; ignored");
            continue;
        };
        let previous: Vec<Vec2i> = problem.variables.iter().map(|&(e, _)| mesh.diff[e]).collect();
        for (&(e, comp), &v) in problem.variables.iter().zip(&values) {
            mesh.diff[e][comp] = v;
        }
        let closed = problem.faces.iter().all(|&f| mesh.face_sum(f) == Vec2i::zeros());
        if !closed || mesh.flipped_faces().len() >= flipped.len() {
            for (&(e, _), &d) in problem.variables.iter().zip(&previous).rev() {
                mesh.diff[e] = d;
            }
        }
    }
    Ok(initial.saturating_sub(mesh.flipped_faces().len()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Vector3;

    #[test]
    fn test_wcnf_format() {
        let mut f = Wcnf::new(2);
        f.add_hard(vec![1, -2]);
        f.add_soft(3, vec![2]);
        let mut buf = Vec::new();
        f.write(&mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert_eq!(text, "p wcnf 2 2 4\n4 1 -2 0\n3 2 0\n");
    }

    #[test]
    fn test_parse_literal_and_bit_models() {
        let a = parse_solver_output("c hi\ns OPTIMUM FOUND\nv 1 -2 3\n", 3).unwrap();
        assert_eq!(a, SatOutcome::Sat(vec![false, true, false, true]));
        let b = parse_solver_output("s OPTIMUM FOUND\nv 101\n", 3).unwrap();
        assert_eq!(b, a);
        assert_eq!(parse_solver_output("s UNSATISFIABLE\n", 3).unwrap(), SatOutcome::Unsat);
        assert!(parse_solver_output("garbage\n", 3).is_err());
    }

    #[test]
    fn test_assignment_enumeration() {
        let mut count = 0;
        for_each_assignment(3, |_| count += 1);
        assert_eq!(count, 27);
        let mut empty = 0;
        for_each_assignment(0, |_| empty += 1);
        assert_eq!(empty, 1);
    }

    /// Square split into two triangles with a valid unit layout.
    fn square() -> LatticeMesh {
        let v = vec![
            Vector3::new(0.0, 0.0, 0.0),
            Vector3::new(1.0, 0.0, 0.0),
            Vector3::new(1.0, 1.0, 0.0),
            Vector3::new(0.0, 1.0, 0.0),
        ];
        let mut mesh = LatticeMesh::from_triangles(v, vec![Vector3::z(); 4], vec![[0, 1, 2], [0, 2, 3]]);
        // Edges: (0,1) (1,2) (0,2) (2,3) (0,3).
        mesh.diff = vec![
            Vec2i::new(1, 0),
            Vec2i::new(0, 1),
            Vec2i::new(1, 1),
            Vec2i::new(-1, 0),
            Vec2i::new(0, 1),
        ];
        mesh.fq = vec![[0, 0, 2], [0, 0, 2]];
        mesh
    }

    #[test]
    fn test_patch_problem_shape() {
        let mesh = square();
        assert!(mesh.inconsistent_faces().is_empty());
        let e2f = mesh.edge_faces();
        let problem = build_patch_problem(&mesh, &e2f, &[0, 1]);
        assert_eq!(problem.variables.len(), 10);
        assert_eq!(problem.formula.num_vars, 30);
        // The current layout is a model of the hard clauses.
        let mut model = vec![false; 31];
        for (i, &(e, c)) in problem.variables.iter().enumerate() {
            model[value_literal(i, mesh.diff[e][c]) as usize] = true;
        }
        assert!(problem.formula.hard_satisfied(&model));
        assert_eq!(decode_model(&problem, &model).unwrap().len(), 10);
    }

    #[test]
    fn test_patch_growth() {
        let mesh = square();
        let e2f = mesh.edge_faces();
        assert_eq!(grow_patch(&mesh, &e2f, &[0], 0), vec![0]);
        assert_eq!(grow_patch(&mesh, &e2f, &[0], 1), vec![0, 1]);
    }

    #[test]
    fn test_missing_solver_is_an_error() {
        let solver = SatSolver::new("/nonexistent/quadriflow-maxsat");
        let err = solver.solve(&Wcnf::new(1)).unwrap_err();
        assert!(matches!(err, MeshError::SatSolver(_)));
        assert!(err.is_recoverable());
    }

    #[cfg(unix)]
    #[test]
    fn test_solver_process_outcomes() {
        let unsat = SatSolver::new("sh").with_args(vec!["-c".into(), "echo 's UNSATISFIABLE'".into()]);
        assert_eq!(unsat.solve(&Wcnf::new(1)).unwrap(), SatOutcome::Unsat);

        let slow = SatSolver::new("sh")
            .with_args(vec!["-c".into(), "sleep 5".into()])
            .with_timeout(Duration::from_millis(100));
        assert_eq!(slow.solve(&Wcnf::new(1)).unwrap(), SatOutcome::Timeout);
    }
}
