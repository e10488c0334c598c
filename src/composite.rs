//! Composite nodes: fixed children joined by static couplings.
//!
//! A composite owns its children and a coupling table built once by
//! [`CompositeBuilder`]. It has no behavior of its own. When invoked it
//! advances its children in micro-steps:
//!
//! 1. every child whose planned time is due, or that has undelivered input,
//!    is eligible;
//! 2. pending input is delivered (at most one value per input port), flow
//!    inputs are pulled, and each eligible child runs in declaration order;
//! 3. posted messages are routed through the couplings, landing either in
//!    a child's pending input or on the composite's own outputs;
//! 4. the micro-step advances and the loop repeats until nothing is
//!    eligible.
//!
//! The composite then reports the earliest planned time of its children.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

use crate::component::Component;
use crate::config::ModelConfig;
use crate::context::NodeContext;
use crate::error::{SimError, SimResult};
use crate::node::{Node, NodeIo, NodeKind};
use crate::port::{Interface, PortGoal, PortKind, PortMode};
use crate::registry::NodeRegistry;
use crate::stats::ComponentStats;
use crate::time::{Duration, TimeQueue};
use crate::types::{ChildIndex, Value};

/// Name used for the composite's own boundary in link endpoints.
pub const BOUNDARY: &str = "self";

/// One end of a coupling.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Endpoint {
    /// A port on the composite's own interface
    Boundary(usize),
    /// A port on a child
    Child { child: ChildIndex, port: usize },
}

/// Builds a [`CompositeNode`] and validates its couplings.
///
/// Endpoints are written `child.port`, with `self.port` for the composite's
/// boundary.
///
/// # Example
///
/// ```rust
/// use devskit::composite::CompositeBuilder;
/// use devskit::nodes::mock::{CounterNode, RelayNode};
/// use devskit::port::{Interface, ValueType};
///
/// let composite = CompositeBuilder::new(Interface::new().message_input("in", ValueType::Any))
///     .child("relay", RelayNode::new())
///     .child("counter", CounterNode::new())
///     .link("self.in", "relay.input")
///     .link("relay.output", "counter.input")
///     .build()
///     .unwrap();
/// assert_eq!(composite.child_names(), vec!["relay", "counter"]);
/// ```
pub struct CompositeBuilder {
    interface: Interface,
    children: Vec<SimResult<Component>>,
    links: Vec<(String, String)>,
}

impl CompositeBuilder {
    pub fn new(interface: Interface) -> Self {
        Self {
            interface,
            children: Vec::new(),
            links: Vec::new(),
        }
    }

    pub fn child(self, name: &str, node: impl Node + 'static) -> Self {
        self.boxed_child(name, Box::new(node))
    }

    pub fn boxed_child(mut self, name: &str, node: Box<dyn Node>) -> Self {
        self.children.push(Component::new(name, node));
        self
    }

    /// Couples two endpoints, `child.port` or `self.port`.
    pub fn link(mut self, from: &str, to: &str) -> Self {
        self.links.push((from.to_string(), to.to_string()));
        self
    }

    /// Couples a boundary input to a child input.
    pub fn inward_link(self, port: &str, child: &str, child_port: &str) -> Self {
        let from = format!("{}.{}", BOUNDARY, port);
        let to = format!("{}.{}", child, child_port);
        self.link(&from, &to)
    }

    /// Couples a child output to another child's input.
    pub fn inner_link(self, child: &str, port: &str, other: &str, other_port: &str) -> Self {
        let from = format!("{}.{}", child, port);
        let to = format!("{}.{}", other, other_port);
        self.link(&from, &to)
    }

    /// Couples a child output to a boundary output.
    pub fn outward_link(self, child: &str, child_port: &str, port: &str) -> Self {
        let from = format!("{}.{}", child, child_port);
        let to = format!("{}.{}", BOUNDARY, port);
        self.link(&from, &to)
    }

    /// Validates the structure and builds the node.
    pub fn build(self) -> SimResult<CompositeNode> {
        if let Some(duplicate) = self.interface.duplicate_name() {
            return Err(SimError::Structure(format!(
                "composite declares port '{}' more than once",
                duplicate
            )));
        }
        let children = self.children.into_iter().collect::<SimResult<Vec<_>>>()?;

        let mut names = HashMap::new();
        for (index, child) in children.iter().enumerate() {
            if child.name() == BOUNDARY {
                return Err(SimError::Structure(format!(
                    "'{}' is reserved for the composite boundary",
                    BOUNDARY
                )));
            }
            if names.insert(child.name().to_string(), index).is_some() {
                return Err(SimError::Structure(format!(
                    "duplicate child name '{}'",
                    child.name()
                )));
            }
        }

        let mut tables = Tables::new(&self.interface, &children);
        let mut seen = HashSet::new();
        for (from, to) in &self.links {
            let source = resolve(from, &self.interface, &children, &names)?;
            let target = resolve(to, &self.interface, &children, &names)?;
            if !seen.insert((source, target)) {
                return Err(SimError::Structure(format!(
                    "duplicate link {} -> {}",
                    from, to
                )));
            }
            tables.add(source, target, from, to, &self.interface, &children)?;
        }
        let order = flow_order(&children, &tables.flow_sources)?;

        let pending = children.iter().map(|_| VecDeque::new()).collect();
        Ok(CompositeNode {
            interface: self.interface,
            names,
            children,
            tables,
            order,
            queue: TimeQueue::new(Default::default()),
            pending,
        })
    }
}

/// Resolved coupling table.
struct Tables {
    /// Message destinations of each boundary input
    inward: Vec<Vec<Endpoint>>,
    /// Message destinations of each child output, by child then port
    outward: Vec<Vec<Vec<Endpoint>>>,
    /// Source of each connected flow input (child input or boundary output)
    flow_sources: HashMap<Endpoint, Endpoint>,
    /// Flow inputs with a source, by child
    child_flow_inputs: Vec<Vec<(usize, Endpoint)>>,
    /// Boundary flow outputs with a source
    boundary_flow_outputs: Vec<(usize, Endpoint)>,
}

impl Tables {
    fn new(interface: &Interface, children: &[Component]) -> Self {
        Self {
            inward: vec![Vec::new(); interface.len()],
            outward: children
                .iter()
                .map(|c| vec![Vec::new(); c.interface().len()])
                .collect(),
            flow_sources: HashMap::new(),
            child_flow_inputs: vec![Vec::new(); children.len()],
            boundary_flow_outputs: Vec::new(),
        }
    }

    fn add(
        &mut self,
        source: Endpoint,
        target: Endpoint,
        from: &str,
        to: &str,
        interface: &Interface,
        children: &[Component],
    ) -> SimResult<()> {
        let source_kind = kind_of(source, interface, children);
        let target_kind = kind_of(target, interface, children);

        // A boundary input acts as a source inside the composite, a boundary
        // output as a target.
        let source_ok = match source {
            Endpoint::Boundary(_) => source_kind.goal() == PortGoal::Input,
            Endpoint::Child { .. } => source_kind.goal() == PortGoal::Output,
        };
        let target_ok = match target {
            Endpoint::Boundary(_) => target_kind.goal() == PortGoal::Output,
            Endpoint::Child { .. } => target_kind.goal() == PortGoal::Input,
        };
        if !source_ok || !target_ok {
            return Err(SimError::Structure(format!(
                "link {} -> {} runs against port directions",
                from, to
            )));
        }
        if source_kind.mode() != target_kind.mode() {
            return Err(SimError::Structure(format!(
                "link {} -> {} couples a {:?} port to a {:?} port",
                from, to, source_kind, target_kind
            )));
        }

        match source_kind.mode() {
            PortMode::Message => match source {
                Endpoint::Boundary(port) => self.inward[port].push(target),
                Endpoint::Child { child, port } => self.outward[child][port].push(target),
            },
            PortMode::Flow => {
                if self.flow_sources.insert(target, source).is_some() {
                    return Err(SimError::Structure(format!(
                        "flow port {} has more than one source",
                        to
                    )));
                }
                match target {
                    Endpoint::Child { child, port } => {
                        self.child_flow_inputs[child].push((port, source))
                    }
                    Endpoint::Boundary(port) => self.boundary_flow_outputs.push((port, source)),
                }
            }
        }
        Ok(())
    }
}

fn kind_of(endpoint: Endpoint, interface: &Interface, children: &[Component]) -> PortKind {
    match endpoint {
        Endpoint::Boundary(port) => interface.get(port).map(|p| p.kind),
        Endpoint::Child { child, port } => children[child].interface().get(port).map(|p| p.kind),
    }
    .unwrap_or(PortKind::MessageOutput)
}

fn resolve(
    text: &str,
    interface: &Interface,
    children: &[Component],
    names: &HashMap<String, usize>,
) -> SimResult<Endpoint> {
    let (node, port) = text.split_once('.').ok_or_else(|| {
        SimError::Structure(format!("link endpoint '{}' must be 'node.port'", text))
    })?;
    if node == BOUNDARY {
        let index = interface.index_of(port).ok_or_else(|| {
            SimError::Structure(format!("composite has no port '{}'", port))
        })?;
        return Ok(Endpoint::Boundary(index));
    }
    let child = *names
        .get(node)
        .ok_or_else(|| SimError::Structure(format!("unknown child '{}' in link", node)))?;
    let index = children[child].interface().index_of(port).ok_or_else(|| {
        SimError::Structure(format!("child '{}' has no port '{}'", node, port))
    })?;
    Ok(Endpoint::Child { child, port: index })
}

/// Topological order of children along flow couplings, declaration order
/// among independent children.
pub(crate) fn flow_order(
    children: &[Component],
    flow_sources: &HashMap<Endpoint, Endpoint>,
) -> SimResult<Vec<ChildIndex>> {
    let n = children.len();
    let mut in_degree = vec![0usize; n];
    let mut successors: Vec<Vec<usize>> = vec![Vec::new(); n];
    let mut edges = HashSet::new();

    for (target, source) in flow_sources {
        if let (Endpoint::Child { child: from, .. }, Endpoint::Child { child: to, .. }) =
            (source, target)
        {
            if from == to {
                return Err(SimError::Structure(format!(
                    "flow coupling loops on child '{}'",
                    children[*from].name()
                )));
            }
            if edges.insert((*from, *to)) {
                successors[*from].push(*to);
                in_degree[*to] += 1;
            }
        }
    }

    let mut ready: BTreeSet<usize> = (0..n).filter(|&i| in_degree[i] == 0).collect();
    let mut order = Vec::with_capacity(n);
    while let Some(current) = ready.pop_first() {
        order.push(current);
        for &next in &successors[current] {
            in_degree[next] -= 1;
            if in_degree[next] == 0 {
                ready.insert(next);
            }
        }
    }

    if order.len() != n {
        let cyclic: Vec<&str> = (0..n)
            .filter(|i| in_degree[*i] > 0)
            .map(|i| children[i].name())
            .collect();
        return Err(SimError::Structure(format!(
            "flow couplings form a cycle through {}",
            cyclic.join(", ")
        )));
    }
    Ok(order)
}

/// A node made of named children and static couplings.
pub struct CompositeNode {
    interface: Interface,
    names: HashMap<String, ChildIndex>,
    children: Vec<Component>,
    tables: Tables,
    order: Vec<ChildIndex>,
    queue: TimeQueue<ChildIndex>,
    pending: Vec<VecDeque<(usize, Value)>>,
}

impl CompositeNode {
    /// Builds a composite from a declarative model, creating each child
    /// through `registry`.
    pub fn from_config(model: &ModelConfig, registry: &NodeRegistry) -> SimResult<Self> {
        let mut interface = Interface::new();
        for port in &model.ports {
            interface = interface.with_port(port.clone());
        }
        let mut builder = CompositeBuilder::new(interface);
        for node in &model.nodes {
            let instance = registry.create(&node.node_type, &node.attrs)?;
            builder = builder.boxed_child(&node.name, instance);
        }
        for link in &model.links {
            builder = builder.link(&link.from, &link.to);
        }
        builder.build()
    }

    pub fn child_names(&self) -> Vec<&str> {
        self.children.iter().map(Component::name).collect()
    }

    pub fn child(&self, name: &str) -> Option<&Component> {
        self.names.get(name).map(|&i| &self.children[i])
    }

    /// Children in the order they are initialized and finalized.
    pub fn flow_order(&self) -> Vec<&str> {
        self.order.iter().map(|&i| self.children[i].name()).collect()
    }

    /// Resolves every connected flow input of child `index`.
    fn prepare_flow_inputs(&mut self, index: ChildIndex, io: &mut NodeIo<'_>) -> SimResult<()> {
        for k in 0..self.tables.child_flow_inputs[index].len() {
            let (port, source) = self.tables.child_flow_inputs[index][k];
            let value = self.pull(source, io)?;
            self.children[index].set_flow_input(port, value);
        }
        Ok(())
    }

    /// Current value of a flow source, refreshing the producing child.
    fn pull(&mut self, source: Endpoint, io: &mut NodeIo<'_>) -> SimResult<Option<Value>> {
        match source {
            Endpoint::Boundary(port) => Ok(io.ports().read(port).cloned()),
            Endpoint::Child { child, port } => {
                self.prepare_flow_inputs(child, io)?;
                self.children[child].refresh_flow(io.clock_mut())?;
                Ok(self.children[child].port_value(port).cloned())
            }
        }
    }

    /// Moves pending messages into a child's ports, one per port.
    fn deliver_pending(&mut self, index: ChildIndex) -> SimResult<()> {
        let waiting = std::mem::take(&mut self.pending[index]);
        let mut deferred = VecDeque::new();
        for (port, value) in waiting {
            if let Some(value) = self.children[index].deliver(port, value)? {
                deferred.push_back((port, value));
            }
        }
        self.pending[index] = deferred;
        Ok(())
    }

    fn send(&mut self, target: Endpoint, value: Value, io: &mut NodeIo<'_>) -> SimResult<()> {
        match target {
            Endpoint::Child { child, port } => {
                self.pending[child].push_back((port, value));
                Ok(())
            }
            Endpoint::Boundary(port) => io.post_value(port, value),
        }
    }

    /// Routes the messages child `index` just posted.
    fn route_outbox(&mut self, index: ChildIndex, io: &mut NodeIo<'_>) -> SimResult<()> {
        for (port, value) in self.children[index].take_outbox() {
            let targets = self.tables.outward[index][port].clone();
            for target in targets {
                self.send(target, value.clone(), io)?;
            }
        }
        Ok(())
    }

    /// Routes boundary inputs received by the composite itself.
    fn route_inputs(&mut self, io: &mut NodeIo<'_>) -> SimResult<()> {
        for port in io.ports().active_inputs() {
            let Some(value) = io.ports().read(port).cloned() else {
                continue;
            };
            let targets = self.tables.inward[port].clone();
            for target in targets {
                self.send(target, value.clone(), io)?;
            }
        }
        Ok(())
    }

    /// Runs micro-steps until no child is eligible.
    fn cascade(&mut self, io: &mut NodeIo<'_>) -> SimResult<()> {
        let limit = io.context().max_micro_steps();
        let mut steps = 0u64;
        loop {
            let now = io.time();
            let mut due: BTreeSet<ChildIndex> = self.queue.pop_due(now).into_iter().collect();
            due.extend((0..self.children.len()).filter(|&i| !self.pending[i].is_empty()));
            if due.is_empty() {
                break;
            }
            if let Some(limit) = limit {
                if steps >= limit {
                    return Err(SimError::NonQuiescent {
                        node: io.full_name().to_string(),
                        time: now,
                        limit,
                    });
                }
            }
            steps += 1;
            self.queue.advance_time(now)?;

            // Input is fixed for the whole micro-step before anyone runs.
            for &index in &due {
                self.deliver_pending(index)?;
            }
            for &index in &due {
                self.prepare_flow_inputs(index, io)?;
                let child = &mut self.children[index];
                let dt = if child.has_input() {
                    self.queue.cancel(&index);
                    child.unplanned(io.clock_mut())?
                } else {
                    child.planned(io.clock_mut())?
                };
                self.queue.plan(index, dt)?;
                self.route_outbox(index, io)?;
            }

            let next = now.next();
            if io.time() < next {
                *io.clock_mut() = next;
            }
        }
        if steps > 0 {
            tracing::trace!(node = io.full_name(), steps, "cascade settled");
        }
        Ok(())
    }
}

impl Node for CompositeNode {
    fn kind(&self) -> NodeKind {
        NodeKind::Composite
    }

    fn interface(&self) -> Interface {
        self.interface.clone()
    }

    fn bind(&mut self, cx: &NodeContext) -> SimResult<()> {
        for child in &mut self.children {
            child.bind(cx)?;
        }
        Ok(())
    }

    fn initialization_event(&mut self, io: &mut NodeIo<'_>) -> SimResult<Duration> {
        self.queue = TimeQueue::new(io.time());
        for k in 0..self.order.len() {
            let index = self.order[k];
            self.prepare_flow_inputs(index, io)?;
            let dt = self.children[index].initialize(io.clock_mut())?;
            self.queue.plan(index, dt)?;
        }
        Ok(self.queue.imminent_duration())
    }

    fn unplanned_event(&mut self, _elapsed: Duration, io: &mut NodeIo<'_>) -> SimResult<Duration> {
        self.queue.advance_time(io.time())?;
        self.route_inputs(io)?;
        self.cascade(io)?;
        Ok(self.queue.imminent_duration())
    }

    fn planned_event(&mut self, _elapsed: Duration, io: &mut NodeIo<'_>) -> SimResult<Duration> {
        self.queue.advance_time(io.time())?;
        self.cascade(io)?;
        Ok(self.queue.imminent_duration())
    }

    fn finalization_event(&mut self, _elapsed: Duration, io: &mut NodeIo<'_>) -> SimResult<()> {
        self.queue.advance_time(io.time())?;
        let mut first_error = None;
        for k in 0..self.order.len() {
            let index = self.order[k];
            if !self.children[index].is_active() {
                continue;
            }
            let result = self
                .prepare_flow_inputs(index, io)
                .and_then(|_| self.children[index].finalize(io.clock_mut()));
            if let Err(err) = result {
                tracing::warn!(node = self.children[index].full_name(), error = %err, "finalization failed");
                first_error.get_or_insert(err);
            }
        }
        self.queue.clear();
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn refresh_flow(&mut self, io: &mut NodeIo<'_>) -> SimResult<()> {
        for k in 0..self.tables.boundary_flow_outputs.len() {
            let (port, source) = self.tables.boundary_flow_outputs[k];
            let value = self.pull(source, io)?;
            io.ports_mut().set_flow(port, value);
        }
        Ok(())
    }

    fn visit_stats(&self, out: &mut Vec<ComponentStats>) {
        for child in &self.children {
            child.collect_stats(out);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodes::function::FunctionNode;
    use crate::nodes::mock::{CounterNode, GeneratorNode, RelayNode};
    use crate::nodes::parameter::ParameterNode;
    use crate::port::ValueType;

    fn double() -> FunctionNode {
        FunctionNode::new(
            Interface::new()
                .flow_input("x", ValueType::Float)
                .flow_output("y", ValueType::Float),
            |io| {
                let x: f64 = io.flow_input_as("x")?;
                io.set_flow_output("y", x * 2.0)
            },
        )
    }

    #[test]
    fn test_unknown_child_rejected() {
        let result = CompositeBuilder::new(Interface::new())
            .child("a", RelayNode::new())
            .link("a.output", "b.input")
            .build();
        assert!(matches!(result, Err(SimError::Structure(_))));
    }

    #[test]
    fn test_duplicate_child_rejected() {
        let result = CompositeBuilder::new(Interface::new())
            .child("a", RelayNode::new())
            .child("a", CounterNode::new())
            .build();
        assert!(matches!(result, Err(SimError::Structure(_))));
    }

    #[test]
    fn test_direction_checked() {
        let result = CompositeBuilder::new(Interface::new())
            .child("a", RelayNode::new())
            .child("b", RelayNode::new())
            .link("a.input", "b.output")
            .build();
        assert!(matches!(result, Err(SimError::Structure(_))));
    }

    #[test]
    fn test_mode_checked() {
        let result = CompositeBuilder::new(Interface::new())
            .child("p", ParameterNode::new(1.0))
            .child("r", RelayNode::new())
            .link("p.parameter", "r.input")
            .build();
        assert!(matches!(result, Err(SimError::Structure(_))));
    }

    #[test]
    fn test_flow_input_single_source() {
        let result = CompositeBuilder::new(Interface::new())
            .child("p", ParameterNode::new(1.0))
            .child("q", ParameterNode::new(2.0))
            .child("f", double())
            .link("p.parameter", "f.x")
            .link("q.parameter", "f.x")
            .build();
        assert!(matches!(result, Err(SimError::Structure(_))));
    }

    #[test]
    fn test_flow_cycle_rejected() {
        let result = CompositeBuilder::new(Interface::new())
            .child("f", double())
            .child("g", double())
            .link("f.y", "g.x")
            .link("g.y", "f.x")
            .build();
        let err = result.err().unwrap();
        assert!(err.to_string().contains("cycle"));
    }

    #[test]
    fn test_flow_order_is_topological() {
        let composite = CompositeBuilder::new(Interface::new())
            .child("f", double())
            .child("gen", GeneratorNode::new(Duration::secs(1)))
            .child("p", ParameterNode::new(1.0))
            .link("p.parameter", "f.x")
            .build()
            .unwrap();
        assert_eq!(composite.flow_order(), vec!["gen", "p", "f"]);
    }

    #[test]
    fn test_reserved_boundary_name() {
        let result = CompositeBuilder::new(Interface::new())
            .child("self", RelayNode::new())
            .build();
        assert!(matches!(result, Err(SimError::Structure(_))));
    }
}
