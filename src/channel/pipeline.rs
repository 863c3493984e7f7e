use async_trait::async_trait;
use log::warn;
use std::any::TypeId;
use std::io::ErrorKind;
use std::marker::PhantomData;
use std::sync::{Arc, Mutex as StdMutex, Weak};

use crate::channel::handler::{write_done, Handler, WriteFuture};
use crate::channel::handler_internal::{
    InboundContextInternal, InboundHandlerInternal, OutboundContextInternal,
    OutboundHandlerInternal,
};
use crate::error::Error;
use crate::runtime::sync::Mutex;
use crate::transport::{AsyncTransport, WriteFlags};

/// Default `(min_available, allocation_size)` read buffer settings.
pub const DEFAULT_READ_BUFFER_SETTINGS: (usize, usize) = (2048, 2048);

/// Observes a pipeline's lifecycle: [PipelineManager::refresh_timeout] is
/// called on every inbound read and before every outbound write, and
/// [PipelineManager::delete_pipeline] once an outbound close has fully torn
/// down the transport. Absence of a manager disables both behaviors.
pub trait PipelineManager: Send + Sync {
    /// The pipeline's transport has been torn down by an outbound close.
    fn delete_pipeline(&self);
    /// Activity was observed; reset any idle timer.
    fn refresh_timeout(&self);
}

/// Settings shared by a pipeline and all of its contexts. Contexts keep a weak
/// reference so re-entrant event propagation cannot resurrect a destroyed
/// pipeline.
pub struct PipelineState {
    transport: StdMutex<Option<Arc<dyn AsyncTransport>>>,
    write_flags: StdMutex<WriteFlags>,
    read_buffer_settings: StdMutex<(usize, usize)>,
    manager: StdMutex<Option<Weak<dyn PipelineManager>>>,
}

impl Default for PipelineState {
    fn default() -> Self {
        Self {
            transport: StdMutex::new(None),
            write_flags: StdMutex::new(WriteFlags::NONE),
            read_buffer_settings: StdMutex::new(DEFAULT_READ_BUFFER_SETTINGS),
            manager: StdMutex::new(None),
        }
    }
}

impl PipelineState {
    pub(crate) fn transport(&self) -> Option<Arc<dyn AsyncTransport>> {
        let transport = self.transport.lock().unwrap();
        transport.clone()
    }

    pub(crate) fn set_transport(&self, new_transport: Option<Arc<dyn AsyncTransport>>) {
        let mut transport = self.transport.lock().unwrap();
        *transport = new_transport;
    }

    pub(crate) fn write_flags(&self) -> WriteFlags {
        *self.write_flags.lock().unwrap()
    }

    pub(crate) fn set_write_flags(&self, flags: WriteFlags) {
        *self.write_flags.lock().unwrap() = flags;
    }

    pub(crate) fn read_buffer_settings(&self) -> (usize, usize) {
        *self.read_buffer_settings.lock().unwrap()
    }

    pub(crate) fn set_read_buffer_settings(&self, settings: (usize, usize)) {
        *self.read_buffer_settings.lock().unwrap() = settings;
    }

    pub(crate) fn manager(&self) -> Option<Arc<dyn PipelineManager>> {
        let manager = self.manager.lock().unwrap();
        manager.as_ref().and_then(Weak::upgrade)
    }

    pub(crate) fn set_manager(&self, manager: Option<Weak<dyn PipelineManager>>) {
        *self.manager.lock().unwrap() = manager;
    }
}

#[allow(clippy::type_complexity)]
struct PipelineInternal {
    handler_names: Vec<String>,

    inbound_contexts: Vec<Option<Arc<Mutex<dyn InboundContextInternal>>>>,
    inbound_handlers: Vec<Option<Arc<Mutex<dyn InboundHandlerInternal>>>>,

    outbound_contexts: Vec<Option<Arc<Mutex<dyn OutboundContextInternal>>>>,
    outbound_handlers: Vec<Option<Arc<Mutex<dyn OutboundHandlerInternal>>>>,

    finalized: bool,
    owner: Option<String>,
}

impl PipelineInternal {
    fn new() -> Self {
        Self {
            handler_names: Vec::new(),

            inbound_contexts: Vec::new(),
            inbound_handlers: Vec::new(),

            outbound_contexts: Vec::new(),
            outbound_handlers: Vec::new(),

            finalized: false,
            owner: None,
        }
    }

    fn add_back(&mut self, handler: impl Handler) -> Result<(), std::io::Error> {
        let (handler_name, inbound, outbound) = handler.generate();
        if self.handler_names.iter().any(|name| name == &handler_name) {
            return Err(std::io::Error::new(
                ErrorKind::InvalidInput,
                format!("can't add_back exist handler with name {}", handler_name),
            ));
        }

        self.handler_names.push(handler_name);
        let (inbound_context, inbound_handler) = match inbound {
            Some((context, handler)) => (Some(context), Some(handler)),
            None => (None, None),
        };
        let (outbound_context, outbound_handler) = match outbound {
            Some((context, handler)) => (Some(context), Some(handler)),
            None => (None, None),
        };

        self.inbound_contexts.push(inbound_context);
        self.inbound_handlers.push(inbound_handler);

        self.outbound_contexts.push(outbound_context);
        self.outbound_handlers.push(outbound_handler);

        self.finalized = false;
        Ok(())
    }

    fn add_front(&mut self, handler: impl Handler) -> Result<(), std::io::Error> {
        let (handler_name, inbound, outbound) = handler.generate();
        if self.handler_names.iter().any(|name| name == &handler_name) {
            return Err(std::io::Error::new(
                ErrorKind::InvalidInput,
                format!("can't add_front exist handler with name {}", handler_name),
            ));
        }

        self.handler_names.insert(0, handler_name);
        let (inbound_context, inbound_handler) = match inbound {
            Some((context, handler)) => (Some(context), Some(handler)),
            None => (None, None),
        };
        let (outbound_context, outbound_handler) = match outbound {
            Some((context, handler)) => (Some(context), Some(handler)),
            None => (None, None),
        };

        self.inbound_contexts.insert(0, inbound_context);
        self.inbound_handlers.insert(0, inbound_handler);

        self.outbound_contexts.insert(0, outbound_context);
        self.outbound_handlers.insert(0, outbound_handler);

        self.finalized = false;
        Ok(())
    }

    fn remove_at(&mut self, index: usize) {
        if let Some(context) = self.inbound_contexts.remove(index) {
            if let Ok(mut context) = context.try_lock() {
                context.detach();
            }
        }
        if let Some(context) = self.outbound_contexts.remove(index) {
            if let Ok(mut context) = context.try_lock() {
                context.detach();
            }
        }
        self.handler_names.remove(index);
        self.inbound_handlers.remove(index);
        self.outbound_handlers.remove(index);

        self.finalized = false;
    }

    fn remove_front(&mut self) -> Result<(), std::io::Error> {
        if self.handler_names.is_empty() {
            Err(std::io::Error::new(
                ErrorKind::NotFound,
                "No handlers in pipeline",
            ))
        } else {
            self.remove_at(0);
            Ok(())
        }
    }

    fn remove_back(&mut self) -> Result<(), std::io::Error> {
        if self.handler_names.is_empty() {
            Err(std::io::Error::new(
                ErrorKind::NotFound,
                "No handlers in pipeline",
            ))
        } else {
            self.remove_at(self.handler_names.len() - 1);
            Ok(())
        }
    }

    fn remove(&mut self, handler_name: &str) -> Result<(), std::io::Error> {
        let index = self
            .handler_names
            .iter()
            .position(|name| name == handler_name);
        match index {
            Some(index) => {
                self.remove_at(index);
                Ok(())
            }
            None => Err(std::io::Error::new(
                ErrorKind::NotFound,
                format!("No such handler \"{}\" in pipeline", handler_name),
            )),
        }
    }

    fn len(&self) -> usize {
        self.handler_names.len()
    }

    #[allow(clippy::type_complexity)]
    fn get_inbound_context(
        &self,
        handler_name: &str,
    ) -> Option<Arc<Mutex<dyn InboundContextInternal>>> {
        for (index, name) in self.handler_names.iter().enumerate() {
            if name == handler_name {
                return self.inbound_contexts[index].clone();
            }
        }
        None
    }

    #[allow(clippy::type_complexity)]
    fn get_outbound_context(
        &self,
        handler_name: &str,
    ) -> Option<Arc<Mutex<dyn OutboundContextInternal>>> {
        for (index, name) in self.handler_names.iter().enumerate() {
            if name == handler_name {
                return self.outbound_contexts[index].clone();
            }
        }
        None
    }

    #[allow(clippy::type_complexity)]
    fn head_inbound(
        &self,
    ) -> Option<(
        Arc<Mutex<dyn InboundContextInternal>>,
        Arc<Mutex<dyn InboundHandlerInternal>>,
    )> {
        for (context, handler) in self
            .inbound_contexts
            .iter()
            .zip(self.inbound_handlers.iter())
        {
            if let (Some(context), Some(handler)) = (context, handler) {
                return Some((context.clone(), handler.clone()));
            }
        }
        None
    }

    #[allow(clippy::type_complexity)]
    fn tail_outbound(
        &self,
    ) -> Option<(
        Arc<Mutex<dyn OutboundContextInternal>>,
        Arc<Mutex<dyn OutboundHandlerInternal>>,
    )> {
        for (context, handler) in self
            .outbound_contexts
            .iter()
            .zip(self.outbound_handlers.iter())
            .rev()
        {
            if let (Some(context), Some(handler)) = (context, handler) {
                return Some((context.clone(), handler.clone()));
            }
        }
        None
    }

    // Detach every context in insertion order, skipping the owner: when a
    // handler owns its pipeline, detaching it mid-destruction would touch a
    // handler that is already being torn down.
    fn detach_all(&mut self) {
        for (index, name) in self.handler_names.iter().enumerate() {
            if Some(name) == self.owner.as_ref() {
                continue;
            }
            if let Some(context) = &self.inbound_contexts[index] {
                if let Ok(mut context) = context.try_lock() {
                    context.detach();
                }
            }
            if let Some(context) = &self.outbound_contexts[index] {
                if let Ok(mut context) = context.try_lock() {
                    context.detach();
                }
            }
        }
    }
}

/// Pipeline implements an advanced form of the Intercepting Filter pattern to
/// give a user full control over how an event is handled and how the handlers
/// in a pipeline interact with each other.
///
/// `R` is the element type entering the head of the inbound chain, `W` the
/// element type accepted at the tail of the outbound chain. Either may be `()`
/// to disable that direction.
pub struct Pipeline<R, W> {
    internal: StdMutex<PipelineInternal>,
    state: Arc<PipelineState>,

    phantom: PhantomData<(R, W)>,
}

impl<R, W> std::fmt::Debug for Pipeline<R, W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline").finish()
    }
}

impl<R: Send + Sync + 'static, W: Send + Sync + 'static> Default for Pipeline<R, W> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: Send + Sync + 'static, W: Send + Sync + 'static> Pipeline<R, W> {
    /// Creates a new Pipeline
    pub fn new() -> Self {
        Self {
            internal: StdMutex::new(PipelineInternal::new()),
            state: Arc::new(PipelineState::default()),

            phantom: PhantomData,
        }
    }

    /// Appends a [Handler] at the last position of this pipeline.
    pub fn add_back(&self, handler: impl Handler) -> Result<&Self, std::io::Error> {
        {
            let mut internal = self.internal.lock().unwrap();
            internal.add_back(handler)?;
        }
        Ok(self)
    }

    /// Inserts a [Handler] at the first position of this pipeline.
    pub fn add_front(&self, handler: impl Handler) -> Result<&Self, std::io::Error> {
        {
            let mut internal = self.internal.lock().unwrap();
            internal.add_front(handler)?;
        }
        Ok(self)
    }

    /// Removes a [Handler] at the first position of this pipeline.
    pub fn remove_front(&self) -> Result<&Self, std::io::Error> {
        {
            let mut internal = self.internal.lock().unwrap();
            internal.remove_front()?;
        }
        Ok(self)
    }

    /// Removes a [Handler] at the last position of this pipeline.
    pub fn remove_back(&self) -> Result<&Self, std::io::Error> {
        {
            let mut internal = self.internal.lock().unwrap();
            internal.remove_back()?;
        }
        Ok(self)
    }

    /// Removes a [Handler] from this pipeline based on handler_name.
    pub fn remove(&self, handler_name: &str) -> Result<&Self, std::io::Error> {
        {
            let mut internal = self.internal.lock().unwrap();
            internal.remove(handler_name)?;
        }
        Ok(self)
    }

    /// Returns the number of handlers in this pipeline.
    pub fn len(&self) -> usize {
        let internal = self.internal.lock().unwrap();
        internal.len()
    }

    /// Returns true if this pipeline holds no handlers.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Marks the named handler as the owner of this pipeline. The owner's
    /// contexts are skipped when the pipeline detaches everything on drop.
    pub fn set_owner(&self, handler_name: &str) -> Result<&Self, std::io::Error> {
        let mut internal = self.internal.lock().unwrap();
        if !internal.handler_names.iter().any(|n| n == handler_name) {
            return Err(std::io::Error::new(
                ErrorKind::NotFound,
                format!("No such handler \"{}\" in pipeline", handler_name),
            ));
        }
        internal.owner = Some(handler_name.to_string());
        Ok(self)
    }

    /// Registers the pipeline manager observing this pipeline. Only a weak
    /// reference is kept.
    pub fn set_pipeline_manager(&self, manager: &Arc<dyn PipelineManager>) -> &Self {
        self.state.set_manager(Some(Arc::downgrade(manager)));
        self
    }

    /// Returns the inbound context of the named handler, if it has one.
    pub fn get_inbound_context(
        &self,
        handler_name: &str,
    ) -> Option<Arc<Mutex<dyn InboundContextInternal>>> {
        let internal = self.internal.lock().unwrap();
        internal.get_inbound_context(handler_name)
    }

    /// Returns the outbound context of the named handler, if it has one.
    pub fn get_outbound_context(
        &self,
        handler_name: &str,
    ) -> Option<Arc<Mutex<dyn OutboundContextInternal>>> {
        let internal = self.internal.lock().unwrap();
        internal.get_outbound_context(handler_name)
    }

    /// Returns the transport currently attached to this pipeline, if any.
    pub fn transport(&self) -> Option<Arc<dyn AsyncTransport>> {
        self.state.transport()
    }

    /// Stores the transport on this pipeline.
    ///
    /// Must only be called from the thread of the event base owning the
    /// transport; the socket handler does this on `transport_active`.
    pub fn set_transport(&self, transport: Option<Arc<dyn AsyncTransport>>) {
        self.state.set_transport(transport);
    }

    /// Returns the pipeline-wide write flags.
    pub fn write_flags(&self) -> WriteFlags {
        self.state.write_flags()
    }

    /// Sets the pipeline-wide write flags.
    pub fn set_write_flags(&self, flags: WriteFlags) -> &Self {
        self.state.set_write_flags(flags);
        self
    }

    /// Returns the read buffer settings `(min_available, allocation_size)`.
    pub fn read_buffer_settings(&self) -> (usize, usize) {
        self.state.read_buffer_settings()
    }

    /// Sets the read buffer settings `(min_available, allocation_size)`.
    pub fn set_read_buffer_settings(&self, settings: (usize, usize)) -> &Self {
        self.state.set_read_buffer_settings(settings);
        self
    }

    /// Finalizes the pipeline: computes both traversal chains, type-checks
    /// every adjacent pair of handlers and attaches all contexts. Must be
    /// called after composition and again after any later `add_*`/`remove`.
    /// Re-finalizing an unchanged pipeline is a no-op.
    #[allow(clippy::type_complexity)]
    pub async fn finalize(&self) -> Result<&Self, std::io::Error> {
        let (names, in_contexts, in_handlers, out_contexts, out_handlers) = {
            let internal = self.internal.lock().unwrap();
            (
                internal.handler_names.clone(),
                internal.inbound_contexts.clone(),
                internal.inbound_handlers.clone(),
                internal.outbound_contexts.clone(),
                internal.outbound_handlers.clone(),
            )
        };
        let n = names.len();

        let inbound_idx: Vec<usize> = (0..n).filter(|&i| in_contexts[i].is_some()).collect();
        let outbound_idx: Vec<usize> = (0..n).filter(|&i| out_contexts[i].is_some()).collect();

        if inbound_idx.is_empty() && TypeId::of::<R>() != TypeId::of::<()>() {
            warn!("pipeline has no inbound handlers but its inbound type is live");
        }
        if outbound_idx.is_empty() && TypeId::of::<W>() != TypeId::of::<()>() {
            warn!("pipeline has no outbound handlers but its outbound type is live");
        }

        // Adjacent inbound contexts must agree on their element types, and the
        // head must accept the pipeline's R.
        if let Some(&first) = inbound_idx.first() {
            let context = in_contexts[first].as_ref().unwrap().lock().await;
            if context.input_type() != TypeId::of::<R>() {
                return Err(std::io::Error::new(
                    ErrorKind::InvalidInput,
                    format!(
                        "inbound type mismatch: pipeline reads {} but head handler \"{}\" reads {}",
                        std::any::type_name::<R>(),
                        names[first],
                        context.input_type_name()
                    ),
                ));
            }
        }
        for window in inbound_idx.windows(2) {
            let (a, b) = (window[0], window[1]);
            let a_context = in_contexts[a].as_ref().unwrap().lock().await;
            let b_context = in_contexts[b].as_ref().unwrap().lock().await;
            if a_context.output_type() != b_context.input_type() {
                return Err(std::io::Error::new(
                    ErrorKind::InvalidInput,
                    format!(
                        "inbound type mismatch: handler \"{}\" fires {} but handler \"{}\" reads {}",
                        names[a],
                        a_context.output_type_name(),
                        names[b],
                        b_context.input_type_name()
                    ),
                ));
            }
        }

        // Outbound traversal runs tail to head: the later handler fires into
        // the earlier one. The tail must accept the pipeline's W.
        if let Some(&last) = outbound_idx.last() {
            let context = out_contexts[last].as_ref().unwrap().lock().await;
            if context.input_type() != TypeId::of::<W>() {
                return Err(std::io::Error::new(
                    ErrorKind::InvalidInput,
                    format!(
                        "outbound type mismatch: pipeline writes {} but tail handler \"{}\" writes {}",
                        std::any::type_name::<W>(),
                        names[last],
                        context.input_type_name()
                    ),
                ));
            }
        }
        for window in outbound_idx.windows(2) {
            let (earlier, later) = (window[0], window[1]);
            let earlier_context = out_contexts[earlier].as_ref().unwrap().lock().await;
            let later_context = out_contexts[later].as_ref().unwrap().lock().await;
            if later_context.output_type() != earlier_context.input_type() {
                return Err(std::io::Error::new(
                    ErrorKind::InvalidInput,
                    format!(
                        "outbound type mismatch: handler \"{}\" fires {} but handler \"{}\" writes {}",
                        names[later],
                        later_context.output_type_name(),
                        names[earlier],
                        earlier_context.input_type_name()
                    ),
                ));
            }
        }

        // Link the inbound chain in insertion order. Each inbound context also
        // gets the nearest outbound-capable context before it, so an inbound
        // handler can fire writes.
        for (pos, &i) in inbound_idx.iter().enumerate() {
            let mut current = in_contexts[i].as_ref().unwrap().lock().await;
            match inbound_idx.get(pos + 1) {
                Some(&next) => {
                    current.set_next_in_context(in_contexts[next].clone());
                    current.set_next_in_handler(in_handlers[next].clone());
                }
                None => {
                    current.set_next_in_context(None);
                    current.set_next_in_handler(None);
                }
            }

            let prev_out = outbound_idx.iter().rev().find(|&&k| k < i).copied();
            match prev_out {
                Some(k) => {
                    current.set_next_out_context(out_contexts[k].clone());
                    current.set_next_out_handler(out_handlers[k].clone());
                }
                None => {
                    current.set_next_out_context(None);
                    current.set_next_out_handler(None);
                }
            }
        }

        // Link the outbound chain in reverse insertion order.
        for (pos, &i) in outbound_idx.iter().enumerate() {
            let mut current = out_contexts[i].as_ref().unwrap().lock().await;
            if pos > 0 {
                let prev = outbound_idx[pos - 1];
                current.set_next_out_context(out_contexts[prev].clone());
                current.set_next_out_handler(out_handlers[prev].clone());
            } else {
                current.set_next_out_context(None);
                current.set_next_out_handler(None);
            }
        }

        // Attach every context in reverse insertion order.
        let weak = Arc::downgrade(&self.state);
        for i in (0..n).rev() {
            if let Some(context) = &in_contexts[i] {
                context.lock().await.attach(weak.clone());
            }
            if let Some(context) = &out_contexts[i] {
                context.lock().await.attach(weak.clone());
            }
        }

        {
            let mut internal = self.internal.lock().unwrap();
            internal.finalized = true;
        }
        Ok(self)
    }

    #[allow(clippy::type_complexity)]
    fn head_pair(
        &self,
    ) -> (
        Option<(
            Arc<Mutex<dyn InboundContextInternal>>,
            Arc<Mutex<dyn InboundHandlerInternal>>,
        )>,
        bool,
    ) {
        let internal = self.internal.lock().unwrap();
        (internal.head_inbound(), internal.finalized)
    }

    #[allow(clippy::type_complexity)]
    fn tail_pair(
        &self,
    ) -> (
        Option<(
            Arc<Mutex<dyn OutboundContextInternal>>,
            Arc<Mutex<dyn OutboundHandlerInternal>>,
        )>,
        bool,
    ) {
        let internal = self.internal.lock().unwrap();
        (internal.tail_outbound(), internal.finalized)
    }

    /// Transport is active now, which means it is connected.
    pub async fn transport_active(&self) {
        let (pair, finalized) = self.head_pair();
        if !finalized {
            warn!("pipeline is not finalized, dropping transport_active");
            return;
        }
        if let Some((context, handler)) = pair {
            let (mut handler, context) = (handler.lock().await, context.lock().await);
            handler.transport_active_internal(&*context).await;
        }
    }

    /// Transport is inactive now, which means it is disconnected.
    pub async fn transport_inactive(&self) {
        let (pair, finalized) = self.head_pair();
        if !finalized {
            warn!("pipeline is not finalized, dropping transport_inactive");
            return;
        }
        if let Some((context, handler)) = pair {
            let (mut handler, context) = (handler.lock().await, context.lock().await);
            handler.transport_inactive_internal(&*context).await;
        }
    }

    /// Reads a message into the head of the inbound chain.
    pub async fn read(&self, msg: R) {
        let (pair, finalized) = self.head_pair();
        if !finalized {
            warn!("pipeline is not finalized, dropping read");
            return;
        }
        if let Some((context, handler)) = pair {
            let (mut handler, context) = (handler.lock().await, context.lock().await);
            handler.read_internal(&*context, Box::new(msg)).await;
        } else {
            warn!("read reached end of pipeline");
        }
    }

    /// Reads an [Error] exception into the head of the inbound chain.
    pub async fn read_exception(&self, err: Error) {
        let (pair, finalized) = self.head_pair();
        if !finalized {
            warn!("pipeline is not finalized, dropping read_exception");
            return;
        }
        if let Some((context, handler)) = pair {
            let (mut handler, context) = (handler.lock().await, context.lock().await);
            handler.read_exception_internal(&*context, err).await;
        } else {
            warn!("read_exception reached end of pipeline: {}", err);
        }
    }

    /// Reads an EOF event into the head of the inbound chain.
    pub async fn read_eof(&self) {
        let (pair, finalized) = self.head_pair();
        if !finalized {
            warn!("pipeline is not finalized, dropping read_eof");
            return;
        }
        if let Some((context, handler)) = pair {
            let (mut handler, context) = (handler.lock().await, context.lock().await);
            handler.read_eof_internal(&*context).await;
        } else {
            warn!("read_eof reached end of pipeline");
        }
    }

    /// Writes a message into the tail of the outbound chain.
    pub async fn write(&self, msg: W) -> WriteFuture {
        let (pair, finalized) = self.tail_pair();
        if !finalized {
            return write_done(Err(Error::new(
                ErrorKind::InvalidInput,
                "pipeline is not finalized".to_string(),
            )));
        }
        if let Some((context, handler)) = pair {
            let (mut handler, context) = (handler.lock().await, context.lock().await);
            handler.write_internal(&*context, Box::new(msg)).await
        } else {
            warn!("write reached end of pipeline");
            write_done(Ok(()))
        }
    }

    /// Writes an [Error] exception into the tail of the outbound chain.
    pub async fn write_exception(&self, err: Error) -> WriteFuture {
        let (pair, finalized) = self.tail_pair();
        if !finalized {
            return write_done(Err(Error::new(
                ErrorKind::InvalidInput,
                "pipeline is not finalized".to_string(),
            )));
        }
        if let Some((context, handler)) = pair {
            let (mut handler, context) = (handler.lock().await, context.lock().await);
            handler.write_exception_internal(&*context, err).await
        } else {
            warn!("write_exception reached end of pipeline: {}", err);
            write_done(Ok(()))
        }
    }

    /// Writes a close event into the tail of the outbound chain.
    pub async fn close(&self) -> WriteFuture {
        let (pair, finalized) = self.tail_pair();
        if !finalized {
            return write_done(Err(Error::new(
                ErrorKind::InvalidInput,
                "pipeline is not finalized".to_string(),
            )));
        }
        if let Some((context, handler)) = pair {
            let (mut handler, context) = (handler.lock().await, context.lock().await);
            handler.close_internal(&*context).await
        } else {
            warn!("close reached end of pipeline");
            write_done(Ok(()))
        }
    }
}

impl<R, W> Drop for Pipeline<R, W> {
    fn drop(&mut self) {
        let internal = match self.internal.get_mut() {
            Ok(internal) => internal,
            Err(poisoned) => poisoned.into_inner(),
        };
        internal.detach_all();
    }
}

/// The inbound face of a pipeline, consumed by transports and bootstraps.
#[async_trait]
pub trait InboundPipeline<R>: Send + Sync {
    /// Transport is active now, which means it is connected.
    async fn transport_active(&self);
    /// Transport is inactive now, which means it is disconnected.
    async fn transport_inactive(&self);
    /// Reads a message.
    async fn read(&self, msg: R);
    /// Reads an [Error] exception.
    async fn read_exception(&self, err: Error);
    /// Reads an EOF event.
    async fn read_eof(&self);
}

#[async_trait]
impl<R: Send + Sync + 'static, W: Send + Sync + 'static> InboundPipeline<R> for Pipeline<R, W> {
    async fn transport_active(&self) {
        Pipeline::transport_active(self).await;
    }
    async fn transport_inactive(&self) {
        Pipeline::transport_inactive(self).await;
    }
    async fn read(&self, msg: R) {
        Pipeline::read(self, msg).await;
    }
    async fn read_exception(&self, err: Error) {
        Pipeline::read_exception(self, err).await;
    }
    async fn read_eof(&self) {
        Pipeline::read_eof(self).await;
    }
}

/// The outbound face of a pipeline, consumed by dispatchers and application
/// code.
#[async_trait]
pub trait OutboundPipeline<W>: Send + Sync {
    /// Writes a message.
    async fn write(&self, msg: W) -> WriteFuture;
    /// Writes an [Error] exception.
    async fn write_exception(&self, err: Error) -> WriteFuture;
    /// Writes a close event.
    async fn close(&self) -> WriteFuture;
}

#[async_trait]
impl<R: Send + Sync + 'static, W: Send + Sync + 'static> OutboundPipeline<W> for Pipeline<R, W> {
    async fn write(&self, msg: W) -> WriteFuture {
        Pipeline::write(self, msg).await
    }
    async fn write_exception(&self, err: Error) -> WriteFuture {
        Pipeline::write_exception(self, err).await
    }
    async fn close(&self) -> WriteFuture {
        Pipeline::close(self).await
    }
}
