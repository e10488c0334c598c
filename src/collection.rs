//! Collection nodes: a runtime population of identity-keyed agents.
//!
//! A collection behaves like an atomic node with macro-level hooks (see
//! [`CollectionModel`]) that also owns a variable set of agents built from
//! a [`Prototype`]. Couplings are declared once against the prototype and
//! apply to every member:
//!
//! - `self.port -> agent.port` broadcasts a boundary input to every agent;
//! - `agent.port -> self.port` gathers an agent output onto the boundary.
//!
//! Agents are dispatched with the same micro-step cascade as composite
//! children. The model adds, removes and addresses agents through an
//! [`Agents`] handle, which is only handed out between micro-steps, so the
//! eligible set of a micro-step never changes while it runs.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::fmt::{self, Display};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::component::Component;
use crate::composite::BOUNDARY;
use crate::context::NodeContext;
use crate::error::{SimError, SimResult};
use crate::node::{Node, NodeIo, NodeKind};
use crate::port::{Interface, PortGoal, PortKind, PortMode};
use crate::registry::NodeRegistry;
use crate::stats::ComponentStats;
use crate::time::{Duration, SuperdenseTime, TimeCache, TimeQueue};
use crate::types::{AgentSerial, Value};

/// Name used for the prototype agent in link endpoints.
pub const AGENT: &str = "agent";

/// Requirements on agent identities. Identities name agents, so their
/// `Display` form must be non-empty and free of `.`.
pub trait AgentId: Clone + Ord + Display + Send + 'static {}

impl<T: Clone + Ord + Display + Send + 'static> AgentId for T {}

/// What to do when the model adds an existing agent or addresses a missing one.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentityPolicy {
    /// Fail the run with [`SimError::Identity`]
    #[default]
    Strict,
    /// Ignore the request
    Lenient,
}

type Factory<Id> = Arc<dyn Fn(&Id) -> SimResult<Box<dyn Node>> + Send + Sync>;

/// Template every agent is built from.
pub struct Prototype<Id> {
    interface: Interface,
    factory: Factory<Id>,
}

impl<Id> Clone for Prototype<Id> {
    fn clone(&self) -> Self {
        Self {
            interface: self.interface.clone(),
            factory: Arc::clone(&self.factory),
        }
    }
}

impl<Id: 'static> Prototype<Id> {
    /// Agents with the given interface, built by `factory` from their identity.
    pub fn new<F, N>(interface: Interface, factory: F) -> Self
    where
        F: Fn(&Id) -> N + Send + Sync + 'static,
        N: Node + 'static,
    {
        Self {
            interface,
            factory: Arc::new(move |id: &Id| -> SimResult<Box<dyn Node>> { Ok(Box::new(factory(id))) }),
        }
    }

    /// Agents created by a registered factory with fixed attributes.
    pub fn from_registry(
        registry: &NodeRegistry,
        node_type: &str,
        attrs: HashMap<String, Value>,
    ) -> SimResult<Self> {
        let factory = registry.factory(node_type).ok_or_else(|| {
            SimError::Structure(format!("unknown node type '{}'", node_type))
        })?;
        let interface = factory(&attrs)?.interface();
        Ok(Self {
            interface,
            factory: Arc::new(move |_: &Id| factory(&attrs)),
        })
    }

    pub fn interface(&self) -> &Interface {
        &self.interface
    }

    fn instantiate(&self, id: &Id) -> SimResult<Box<dyn Node>> {
        let node = (self.factory)(id)?;
        if node.interface() != self.interface {
            return Err(SimError::Structure(
                "agent interface differs from the prototype's".to_string(),
            ));
        }
        Ok(node)
    }
}

impl<Id> fmt::Debug for Prototype<Id> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Prototype")
            .field("interface", &self.interface)
            .finish_non_exhaustive()
    }
}

/// Macro-level behavior of a collection.
///
/// Every hook receives the population handle and the collection's own
/// [`NodeIo`]. Durations returned by the hooks plan the collection's macro
/// event; [`Duration::INFINITE`] cancels it.
pub trait CollectionModel<Id>: Send {
    fn macro_initialization_event(
        &mut self,
        agents: &mut Agents<'_, Id>,
        io: &mut NodeIo<'_>,
    ) -> SimResult<Duration>;

    /// Runs when messages arrive on the collection's boundary, before they
    /// are broadcast to the agents.
    fn macro_unplanned_event(
        &mut self,
        elapsed: Duration,
        agents: &mut Agents<'_, Id>,
        io: &mut NodeIo<'_>,
    ) -> SimResult<Duration>;

    /// Runs for each message an agent posted, after the micro-step that
    /// produced it. Returning `None` keeps the current macro plan.
    fn agent_output(
        &mut self,
        _id: &Id,
        _port: &str,
        _value: &Value,
        _agents: &mut Agents<'_, Id>,
        _io: &mut NodeIo<'_>,
    ) -> SimResult<Option<Duration>> {
        Ok(None)
    }

    fn macro_planned_event(
        &mut self,
        _elapsed: Duration,
        _agents: &mut Agents<'_, Id>,
        _io: &mut NodeIo<'_>,
    ) -> SimResult<Duration> {
        Ok(Duration::INFINITE)
    }

    /// Runs before the remaining agents are finalized.
    fn macro_finalization_event(
        &mut self,
        _elapsed: Duration,
        _agents: &mut Agents<'_, Id>,
        _io: &mut NodeIo<'_>,
    ) -> SimResult<()> {
        Ok(())
    }
}

/// Queue key of a collection: one per agent plus the macro event, which
/// sorts after every agent.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
enum Slot {
    Agent(AgentSerial),
    Macro,
}

struct Agent<Id> {
    id: Id,
    component: Component,
    pending: VecDeque<(usize, Value)>,
}

/// Agent storage shared by the collection and its [`Agents`] handle.
struct Population<Id> {
    cx: NodeContext,
    prototype: Prototype<Id>,
    policy: IdentityPolicy,
    /// Agents by serial; serials grow, so this is insertion order
    members: BTreeMap<AgentSerial, Agent<Id>>,
    index: BTreeMap<Id, AgentSerial>,
    next_serial: AgentSerial,
    queue: TimeQueue<Slot>,
    /// Values of broadcast flow inputs for the current event, by agent port
    flow_values: Vec<(usize, Option<Value>)>,
    /// Counters of finalized agents, in retirement order
    retired: Vec<ComponentStats>,
}

fn apply_flow(values: &[(usize, Option<Value>)], component: &mut Component) {
    for (port, value) in values {
        component.set_flow_input(*port, value.clone());
    }
}

impl<Id: AgentId> Population<Id> {
    fn identity(&self, id: &Id, reason: &str) -> SimResult<()> {
        match self.policy {
            IdentityPolicy::Strict => Err(SimError::Identity {
                node: self.cx.full_name().to_string(),
                agent: id.to_string(),
                reason: reason.to_string(),
            }),
            IdentityPolicy::Lenient => {
                debug!(node = self.cx.full_name(), agent = %id, reason, "identity request ignored");
                Ok(())
            }
        }
    }

    fn add(&mut self, id: Id, clock: &mut SuperdenseTime) -> SimResult<bool> {
        if self.index.contains_key(&id) {
            return self.identity(&id, "agent already exists").map(|_| false);
        }
        let node = self.prototype.instantiate(&id)?;
        let mut component = Component::new(id.to_string(), node)?;
        component.bind(&self.cx)?;
        apply_flow(&self.flow_values, &mut component);
        let dt = component.initialize(clock)?;

        let serial = self.next_serial;
        self.next_serial += 1;
        self.queue.plan(Slot::Agent(serial), dt)?;
        debug!(node = self.cx.full_name(), agent = %id, serial, "agent added");
        self.index.insert(id.clone(), serial);
        self.members.insert(
            serial,
            Agent {
                id,
                component,
                pending: VecDeque::new(),
            },
        );
        Ok(true)
    }

    fn remove(&mut self, id: &Id, clock: &mut SuperdenseTime) -> SimResult<bool> {
        let Some(serial) = self.index.remove(id) else {
            return self.identity(id, "no such agent").map(|_| false);
        };
        self.queue.cancel(&Slot::Agent(serial));
        if let Some(mut agent) = self.members.remove(&serial) {
            apply_flow(&self.flow_values, &mut agent.component);
            let finalized = agent.component.finalize(clock);
            agent.component.collect_stats(&mut self.retired);
            finalized?;
        }
        debug!(node = self.cx.full_name(), agent = %id, serial, "agent removed");
        Ok(true)
    }

    fn port(&self, port: &str, kind: PortKind) -> SimResult<usize> {
        let interface = self.prototype.interface();
        match interface.index_of(port).and_then(|i| interface.get(i).map(|p| (i, p))) {
            Some((index, spec)) if spec.kind == kind => Ok(index),
            Some((_, spec)) => Err(SimError::port(
                self.cx.full_name(),
                port,
                format!("agent port is {:?}, not {:?}", spec.kind, kind),
            )),
            None => Err(SimError::port(self.cx.full_name(), port, "agents have no such port")),
        }
    }

    fn send(&mut self, id: &Id, port: &str, value: Value) -> SimResult<bool> {
        let index = self.port(port, PortKind::MessageInput)?;
        if let Some(spec) = self.prototype.interface().get(index) {
            if !spec.ty.accepts(&value) {
                return Err(SimError::port(
                    self.cx.full_name(),
                    port,
                    format!("value {} is not of type {:?}", value, spec.ty),
                ));
            }
        }
        let Some(agent) = self.index.get(id).and_then(|s| self.members.get_mut(s)) else {
            return self.identity(id, "no such agent").map(|_| false);
        };
        agent.pending.push_back((index, value));
        Ok(true)
    }

    fn flow_output(
        &mut self,
        id: &Id,
        port: &str,
        clock: &mut SuperdenseTime,
    ) -> SimResult<Option<Value>> {
        let index = self.port(port, PortKind::FlowOutput)?;
        let Some(agent) = self.index.get(id).and_then(|s| self.members.get_mut(s)) else {
            return self.identity(id, "no such agent").map(|_| None);
        };
        apply_flow(&self.flow_values, &mut agent.component);
        agent.component.refresh_flow(clock)?;
        Ok(agent.component.port_value(index).cloned())
    }

    /// Moves pending messages into an agent's ports, one per port.
    fn deliver_pending(&mut self, serial: AgentSerial) -> SimResult<()> {
        let Some(agent) = self.members.get_mut(&serial) else {
            return Ok(());
        };
        let waiting = std::mem::take(&mut agent.pending);
        for (port, value) in waiting {
            if let Some(value) = agent.component.deliver(port, value)? {
                agent.pending.push_back((port, value));
            }
        }
        Ok(())
    }
}

/// Handle through which a [`CollectionModel`] manages the population.
pub struct Agents<'a, Id> {
    population: &'a mut Population<Id>,
    clock: SuperdenseTime,
}

impl<'a, Id: AgentId> Agents<'a, Id> {
    /// Creates and initializes an agent. Returns false if the policy
    /// ignored a duplicate.
    pub fn add(&mut self, id: Id) -> SimResult<bool> {
        self.population.add(id, &mut self.clock)
    }

    /// Finalizes and drops an agent. Returns false if the policy ignored a
    /// missing identity.
    pub fn remove(&mut self, id: &Id) -> SimResult<bool> {
        self.population.remove(id, &mut self.clock)
    }

    /// Queues a message for an agent's input; it is delivered in the next
    /// micro-step.
    pub fn send(&mut self, id: &Id, port: &str, value: impl Serialize) -> SimResult<bool> {
        let value = serde_json::to_value(value).map_err(|source| SimError::Payload {
            node: self.population.cx.full_name().to_string(),
            port: port.to_string(),
            source,
        })?;
        self.population.send(id, port, value)
    }

    pub fn contains(&self, id: &Id) -> bool {
        self.population.index.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.population.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.population.members.is_empty()
    }

    /// Identities in insertion order.
    pub fn ids(&self) -> Vec<Id> {
        self.population.members.values().map(|a| a.id.clone()).collect()
    }

    /// Current value of an agent's flow output.
    pub fn flow_output(&mut self, id: &Id, port: &str) -> SimResult<Option<Value>> {
        self.population.flow_output(id, port, &mut self.clock)
    }

    pub fn time(&self) -> SuperdenseTime {
        self.clock
    }
}

/// Builds a [`CollectionNode`] and validates its couplings.
///
/// Endpoints are written `self.port` for the boundary and `agent.port` for
/// the prototype.
pub struct CollectionBuilder<Id> {
    interface: Interface,
    prototype: Prototype<Id>,
    policy: IdentityPolicy,
    links: Vec<(String, String)>,
}

impl<Id: AgentId> CollectionBuilder<Id> {
    pub fn new(interface: Interface, prototype: Prototype<Id>) -> Self {
        Self {
            interface,
            prototype,
            policy: IdentityPolicy::default(),
            links: Vec::new(),
        }
    }

    pub fn policy(mut self, policy: IdentityPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn link(mut self, from: &str, to: &str) -> Self {
        self.links.push((from.to_string(), to.to_string()));
        self
    }

    pub fn build<M: CollectionModel<Id>>(self, model: M) -> SimResult<CollectionNode<Id, M>> {
        for (owner, interface) in [("collection", &self.interface), (AGENT, self.prototype.interface())] {
            if let Some(duplicate) = interface.duplicate_name() {
                return Err(SimError::Structure(format!(
                    "{} declares port '{}' more than once",
                    owner, duplicate
                )));
            }
        }

        let agent_interface = self.prototype.interface().clone();
        let mut broadcast = vec![Vec::new(); self.interface.len()];
        let mut broadcast_flow: Vec<(usize, usize)> = Vec::new();
        let mut gather = vec![Vec::new(); agent_interface.len()];
        let mut seen = HashSet::new();

        for (from, to) in &self.links {
            if !seen.insert((from.clone(), to.clone())) {
                return Err(SimError::Structure(format!("duplicate link {} -> {}", from, to)));
            }
            let (source_owner, source_port) = split(from)?;
            let (target_owner, target_port) = split(to)?;
            match (source_owner, target_owner) {
                (BOUNDARY, AGENT) => {
                    let (b, bk) = lookup(&self.interface, source_port, from)?;
                    let (a, ak) = lookup(&agent_interface, target_port, to)?;
                    if bk.goal() != PortGoal::Input || ak != bk {
                        return Err(SimError::Structure(format!(
                            "link {} -> {} must join two inputs of the same mode",
                            from, to
                        )));
                    }
                    match bk.mode() {
                        PortMode::Message => broadcast[b].push(a),
                        PortMode::Flow => {
                            if broadcast_flow.iter().any(|&(port, _)| port == a) {
                                return Err(SimError::Structure(format!(
                                    "flow port {} has more than one source",
                                    to
                                )));
                            }
                            broadcast_flow.push((a, b));
                        }
                    }
                }
                (AGENT, BOUNDARY) => {
                    let (a, ak) = lookup(&agent_interface, source_port, from)?;
                    let (b, bk) = lookup(&self.interface, target_port, to)?;
                    if ak != PortKind::MessageOutput || bk != PortKind::MessageOutput {
                        return Err(SimError::Structure(format!(
                            "link {} -> {} must join two message outputs",
                            from, to
                        )));
                    }
                    gather[a].push(b);
                }
                _ => {
                    return Err(SimError::Structure(format!(
                        "link {} -> {} must join '{}' and '{}'",
                        from,
                        to,
                        BOUNDARY,
                        AGENT
                    )))
                }
            }
        }

        let cx = NodeContext::detached("collection");
        Ok(CollectionNode {
            interface: self.interface,
            model,
            population: Population {
                cx,
                prototype: self.prototype,
                policy: self.policy,
                members: BTreeMap::new(),
                index: BTreeMap::new(),
                next_serial: 0,
                queue: TimeQueue::new(SuperdenseTime::default()),
                flow_values: Vec::new(),
                retired: Vec::new(),
            },
            broadcast,
            broadcast_flow,
            gather,
            cache: TimeCache::new(Default::default()),
        })
    }
}

fn split(text: &str) -> SimResult<(&str, &str)> {
    text.split_once('.')
        .ok_or_else(|| SimError::Structure(format!("link endpoint '{}' must be 'node.port'", text)))
}

fn lookup(interface: &Interface, port: &str, endpoint: &str) -> SimResult<(usize, PortKind)> {
    interface
        .index_of(port)
        .and_then(|i| interface.get(i).map(|p| (i, p.kind)))
        .ok_or_else(|| SimError::Structure(format!("unknown port in link endpoint '{}'", endpoint)))
}

/// A node owning a dynamic population of agents.
pub struct CollectionNode<Id, M> {
    interface: Interface,
    model: M,
    population: Population<Id>,
    /// Agent message inputs fed by each boundary message input
    broadcast: Vec<Vec<usize>>,
    /// (agent flow input, boundary flow input)
    broadcast_flow: Vec<(usize, usize)>,
    /// Boundary outputs fed by each agent message output
    gather: Vec<Vec<usize>>,
    cache: TimeCache<Slot>,
}

impl<Id: AgentId, M: CollectionModel<Id>> CollectionNode<Id, M> {
    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn len(&self) -> usize {
        self.population.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.population.members.is_empty()
    }

    /// Identities in insertion order.
    pub fn ids(&self) -> Vec<Id> {
        self.population.members.values().map(|a| a.id.clone()).collect()
    }

    /// Runs a model hook with access to the population.
    fn with_agents<R>(
        &mut self,
        io: &mut NodeIo<'_>,
        hook: impl FnOnce(&mut M, &mut Agents<'_, Id>, &mut NodeIo<'_>) -> SimResult<R>,
    ) -> SimResult<R> {
        let mut agents = Agents {
            population: &mut self.population,
            clock: io.time(),
        };
        let result = hook(&mut self.model, &mut agents, io);
        let clock = agents.clock;
        if clock > io.time() {
            *io.clock_mut() = clock;
        }
        result
    }

    fn snapshot_flow(&mut self, io: &NodeIo<'_>) {
        self.population.flow_values = self
            .broadcast_flow
            .iter()
            .map(|&(agent_port, boundary)| (agent_port, io.ports().read(boundary).cloned()))
            .collect();
    }

    fn macro_elapsed(&self) -> Duration {
        self.cache.duration_since(&Slot::Macro).unwrap_or(Duration::ZERO)
    }

    fn plan_macro(&mut self, dt: Duration) -> SimResult<()> {
        if dt.is_negative() {
            return Err(SimError::contract(
                self.population.cx.full_name(),
                self.population.queue.now(),
                format!("macro event returned negative planned duration {}", dt),
            ));
        }
        self.population.queue.plan(Slot::Macro, dt)?;
        self.cache.retain_event(Slot::Macro);
        Ok(())
    }

    fn advance(&mut self, io: &NodeIo<'_>) -> SimResult<()> {
        let now = io.time();
        self.population.queue.advance_time(now)?;
        self.cache.advance_time(now.t())?;
        Ok(())
    }

    /// Queues boundary messages for every agent coupled to them.
    fn broadcast_inputs(&mut self, io: &NodeIo<'_>) {
        for port in io.ports().active_inputs() {
            let Some(value) = io.ports().read(port) else {
                continue;
            };
            for &agent_port in &self.broadcast[port] {
                for agent in self.population.members.values_mut() {
                    agent.pending.push_back((agent_port, value.clone()));
                }
            }
        }
    }

    /// Runs micro-steps until neither an agent nor the macro event is due.
    fn cascade(&mut self, io: &mut NodeIo<'_>) -> SimResult<()> {
        let limit = io.context().max_micro_steps();
        let mut steps = 0u64;
        loop {
            let now = io.time();
            let mut macro_due = false;
            let mut due = BTreeSet::new();
            for slot in self.population.queue.pop_due(now) {
                match slot {
                    Slot::Agent(serial) => {
                        due.insert(serial);
                    }
                    Slot::Macro => macro_due = true,
                }
            }
            due.extend(
                self.population
                    .members
                    .iter()
                    .filter(|(_, agent)| !agent.pending.is_empty())
                    .map(|(&serial, _)| serial),
            );
            if due.is_empty() && !macro_due {
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
            self.advance(io)?;

            for &serial in &due {
                self.population.deliver_pending(serial)?;
            }
            let mut outputs = Vec::new();
            for &serial in &due {
                let population = &mut self.population;
                let Some(agent) = population.members.get_mut(&serial) else {
                    continue;
                };
                apply_flow(&population.flow_values, &mut agent.component);
                let dt = if agent.component.has_input() {
                    population.queue.cancel(&Slot::Agent(serial));
                    agent.component.unplanned(io.clock_mut())?
                } else {
                    agent.component.planned(io.clock_mut())?
                };
                population.queue.plan(Slot::Agent(serial), dt)?;
                for (port, value) in agent.component.take_outbox() {
                    for &boundary in &self.gather[port] {
                        io.post_value(boundary, value.clone())?;
                    }
                    outputs.push((serial, port, value));
                }
            }

            if macro_due {
                let elapsed = self.macro_elapsed();
                let dt = self.with_agents(io, |model, agents, io| {
                    model.macro_planned_event(elapsed, agents, io)
                })?;
                self.plan_macro(dt)?;
            }

            for (serial, port, value) in outputs {
                let Some(id) = self.population.members.get(&serial).map(|a| a.id.clone()) else {
                    continue;
                };
                let name = self
                    .population
                    .prototype
                    .interface()
                    .get(port)
                    .map(|p| p.name.clone())
                    .unwrap_or_default();
                let replan = self.with_agents(io, |model, agents, io| {
                    model.agent_output(&id, &name, &value, agents, io)
                })?;
                if let Some(dt) = replan {
                    self.plan_macro(dt)?;
                }
            }

            let next = now.next();
            if io.time() < next {
                *io.clock_mut() = next;
            }
        }
        if steps > 0 {
            tracing::trace!(node = io.full_name(), steps, agents = self.len(), "cascade settled");
        }
        Ok(())
    }
}

impl<Id: AgentId, M: CollectionModel<Id>> Node for CollectionNode<Id, M> {
    fn kind(&self) -> NodeKind {
        NodeKind::Collection
    }

    fn interface(&self) -> Interface {
        self.interface.clone()
    }

    fn bind(&mut self, cx: &NodeContext) -> SimResult<()> {
        self.population.cx = cx.clone();
        Ok(())
    }

    fn initialization_event(&mut self, io: &mut NodeIo<'_>) -> SimResult<Duration> {
        let now = io.time();
        self.population.queue = TimeQueue::new(now);
        self.cache = TimeCache::new(now.t());
        self.snapshot_flow(io);
        let dt = self.with_agents(io, |model, agents, io| {
            model.macro_initialization_event(agents, io)
        })?;
        self.plan_macro(dt)?;
        Ok(self.population.queue.imminent_duration())
    }

    fn unplanned_event(&mut self, _elapsed: Duration, io: &mut NodeIo<'_>) -> SimResult<Duration> {
        self.advance(io)?;
        self.snapshot_flow(io);
        let elapsed = self.macro_elapsed();
        let dt = self.with_agents(io, |model, agents, io| {
            model.macro_unplanned_event(elapsed, agents, io)
        })?;
        self.plan_macro(dt)?;
        self.broadcast_inputs(io);
        self.cascade(io)?;
        Ok(self.population.queue.imminent_duration())
    }

    fn planned_event(&mut self, _elapsed: Duration, io: &mut NodeIo<'_>) -> SimResult<Duration> {
        self.advance(io)?;
        self.snapshot_flow(io);
        self.cascade(io)?;
        Ok(self.population.queue.imminent_duration())
    }

    fn finalization_event(&mut self, _elapsed: Duration, io: &mut NodeIo<'_>) -> SimResult<()> {
        self.advance(io)?;
        self.snapshot_flow(io);
        let elapsed = self.macro_elapsed();
        let mut first_error = self
            .with_agents(io, |model, agents, io| {
                model.macro_finalization_event(elapsed, agents, io)
            })
            .err();

        let members = std::mem::take(&mut self.population.members);
        for (_, mut agent) in members {
            apply_flow(&self.population.flow_values, &mut agent.component);
            if let Err(err) = agent.component.finalize(io.clock_mut()) {
                tracing::warn!(node = agent.component.full_name(), error = %err, "finalization failed");
                first_error.get_or_insert(err);
            }
            agent.component.collect_stats(&mut self.population.retired);
        }
        self.population.index.clear();
        self.population.queue.clear();
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn visit_stats(&self, out: &mut Vec<ComponentStats>) {
        out.extend(self.population.retired.iter().cloned());
        for agent in self.population.members.values() {
            agent.component.collect_stats(out);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodes::mock::{CounterNode, GeneratorNode};
    use crate::port::ValueType;
    use crate::time::TimePoint;
    use parking_lot::Mutex;
    use serde_json::json;

    fn at(ms: i64) -> SuperdenseTime {
        SuperdenseTime::at(TimePoint::from_origin(Duration::millis(ms)).unwrap())
    }

    /// Adds and removes agents on request and records their output.
    #[derive(Default)]
    struct Spawner {
        initial: Vec<u32>,
        seen: Arc<Mutex<Vec<(u32, Value)>>>,
        population: Arc<Mutex<Vec<u32>>>,
    }

    impl CollectionModel<u32> for Spawner {
        fn macro_initialization_event(
            &mut self,
            agents: &mut Agents<'_, u32>,
            _io: &mut NodeIo<'_>,
        ) -> SimResult<Duration> {
            for &id in &self.initial {
                agents.add(id)?;
            }
            *self.population.lock() = agents.ids();
            Ok(Duration::INFINITE)
        }

        fn macro_unplanned_event(
            &mut self,
            _elapsed: Duration,
            agents: &mut Agents<'_, u32>,
            io: &mut NodeIo<'_>,
        ) -> SimResult<Duration> {
            if io.received("spawn") {
                agents.add(io.message_as("spawn")?)?;
            }
            if io.received("kill") {
                agents.remove(&io.message_as("kill")?)?;
            }
            *self.population.lock() = agents.ids();
            Ok(Duration::INFINITE)
        }

        fn agent_output(
            &mut self,
            id: &u32,
            _port: &str,
            value: &Value,
            _agents: &mut Agents<'_, u32>,
            _io: &mut NodeIo<'_>,
        ) -> SimResult<Option<Duration>> {
            self.seen.lock().push((*id, value.clone()));
            Ok(None)
        }
    }

    fn generators() -> Prototype<u32> {
        Prototype::new(
            Interface::new().message_output("output", ValueType::Object),
            |_: &u32| GeneratorNode::new(Duration::millis(10)).with_limit(1),
        )
    }

    fn collection(model: Spawner, policy: IdentityPolicy) -> Component {
        let node = CollectionBuilder::new(
            Interface::new()
                .message_input("spawn", ValueType::Int)
                .message_input("kill", ValueType::Int)
                .message_output("output", ValueType::Any),
            generators(),
        )
        .policy(policy)
        .link("agent.output", "self.output")
        .build(model)
        .unwrap();
        let mut c = Component::new("pool", Box::new(node)).unwrap();
        c.bind_root(NodeContext::detached("pool")).unwrap();
        c
    }

    #[test]
    fn test_agents_fire_in_insertion_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let population = Arc::new(Mutex::new(Vec::new()));
        let model = Spawner {
            initial: vec![3, 1, 2],
            seen: seen.clone(),
            population: population.clone(),
        };
        let mut c = collection(model, IdentityPolicy::Strict);
        assert_eq!(c.initialize(&mut at(0)).unwrap(), Duration::millis(10));
        assert_eq!(*population.lock(), vec![3, 1, 2]);

        assert_eq!(c.planned(&mut at(10)).unwrap(), Duration::INFINITE);
        let ids: Vec<u32> = seen.lock().iter().map(|(id, _)| *id).collect();
        assert_eq!(ids, vec![3, 1, 2]);
        assert_eq!(c.take_outbox().len(), 3);
    }

    #[test]
    fn test_duplicate_add_strict() {
        let mut c = collection(Spawner::default(), IdentityPolicy::Strict);
        c.initialize(&mut at(0)).unwrap();
        c.deliver(0, json!(1)).unwrap();
        c.unplanned(&mut at(1)).unwrap();
        c.deliver(0, json!(1)).unwrap();
        let err = c.unplanned(&mut at(2)).unwrap_err();
        assert!(matches!(err, SimError::Identity { .. }));
    }

    #[test]
    fn test_duplicate_add_lenient() {
        let population = Arc::new(Mutex::new(Vec::new()));
        let model = Spawner {
            population: population.clone(),
            ..Default::default()
        };
        let mut c = collection(model, IdentityPolicy::Lenient);
        c.initialize(&mut at(0)).unwrap();
        c.deliver(0, json!(1)).unwrap();
        c.unplanned(&mut at(1)).unwrap();
        c.deliver(0, json!(1)).unwrap();
        c.unplanned(&mut at(2)).unwrap();
        assert_eq!(*population.lock(), vec![1]);

        c.deliver(1, json!(9)).unwrap();
        c.unplanned(&mut at(3)).unwrap();
        assert_eq!(*population.lock(), vec![1]);
    }

    #[test]
    fn test_readded_agent_starts_fresh() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let population = Arc::new(Mutex::new(Vec::new()));
        let model = Spawner {
            seen: seen.clone(),
            population: population.clone(),
            ..Default::default()
        };
        let mut c = collection(model, IdentityPolicy::Strict);
        c.initialize(&mut at(0)).unwrap();

        c.deliver(0, json!(1)).unwrap();
        assert_eq!(c.unplanned(&mut at(0)).unwrap(), Duration::millis(10));
        c.deliver(1, json!(1)).unwrap();
        assert_eq!(c.unplanned(&mut at(5)).unwrap(), Duration::INFINITE);
        assert!(population.lock().is_empty());

        c.deliver(0, json!(1)).unwrap();
        assert_eq!(c.unplanned(&mut at(7)).unwrap(), Duration::millis(10));
        c.planned(&mut at(17)).unwrap();
        assert_eq!(*seen.lock(), vec![(1, json!({ "seq": 1 }))]);
    }

    #[test]
    fn test_finalize_drains_population() {
        let model = Spawner {
            initial: vec![1, 2],
            ..Default::default()
        };
        let mut c = collection(model, IdentityPolicy::Strict);
        c.initialize(&mut at(0)).unwrap();
        c.finalize(&mut at(5)).unwrap();
        let mut stats = Vec::new();
        c.collect_stats(&mut stats);
        // Finalized agents keep reporting their counters.
        let names: Vec<&str> = stats.iter().map(|s| s.full_name.as_str()).collect();
        assert_eq!(names, vec!["pool", "pool.1", "pool.2"]);
        assert!(stats[1..].iter().all(|s| s.planned_events == 0));
    }

    #[test]
    fn test_broadcast_reaches_every_agent() {
        struct Fixed;
        impl CollectionModel<String> for Fixed {
            fn macro_initialization_event(
                &mut self,
                agents: &mut Agents<'_, String>,
                _io: &mut NodeIo<'_>,
            ) -> SimResult<Duration> {
                agents.add("a".to_string())?;
                agents.add("b".to_string())?;
                Ok(Duration::INFINITE)
            }

            fn macro_unplanned_event(
                &mut self,
                _elapsed: Duration,
                agents: &mut Agents<'_, String>,
                _io: &mut NodeIo<'_>,
            ) -> SimResult<Duration> {
                assert_eq!(agents.flow_output(&"a".to_string(), "count")?, Some(json!(0)));
                Ok(Duration::millis(1))
            }

            fn macro_planned_event(
                &mut self,
                elapsed: Duration,
                agents: &mut Agents<'_, String>,
                _io: &mut NodeIo<'_>,
            ) -> SimResult<Duration> {
                assert_eq!(elapsed, Duration::millis(1));
                assert_eq!(agents.flow_output(&"b".to_string(), "count")?, Some(json!(1)));
                Ok(Duration::INFINITE)
            }
        }

        let node = CollectionBuilder::new(
            Interface::new().message_input("tick", ValueType::Any),
            Prototype::new(
                Interface::new()
                    .message_input("input", ValueType::Any)
                    .flow_output("count", ValueType::Int),
                |_: &String| CounterNode::new(),
            ),
        )
        .link("self.tick", "agent.input")
        .build(Fixed)
        .unwrap();
        let mut c = Component::new("pool", Box::new(node)).unwrap();
        c.initialize(&mut at(0)).unwrap();
        c.deliver(0, json!("go")).unwrap();
        assert_eq!(c.unplanned(&mut at(2)).unwrap(), Duration::millis(1));
        assert_eq!(c.planned(&mut at(3)).unwrap(), Duration::INFINITE);
    }

    #[test]
    fn test_invalid_links_rejected() {
        let build = |from: &str, to: &str| {
            CollectionBuilder::new(
                Interface::new()
                    .message_input("in", ValueType::Any)
                    .message_output("out", ValueType::Any),
                generators(),
            )
            .link(from, to)
            .build(Spawner::default())
        };
        assert!(build("self.in", "agent.output").is_err());
        assert!(build("agent.output", "agent.output").is_err());
        assert!(build("agent.output", "self.in").is_err());
        assert!(build("agent.missing", "self.out").is_err());
        assert!(build("agent.output", "self.out").is_ok());
    }
}
