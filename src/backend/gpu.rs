//! wgpu device backend.
//!
//! Programs are validated with naga, then turned into one compute
//! pipeline per kernel they expose.  Bind group layouts follow the
//! binding order documented on [`KernelKind`].  Device-side validation
//! errors are captured with error scopes and surfaced as [`Error`]s
//! instead of wgpu's default panic handler.

use std::collections::HashMap;
use std::num::NonZeroU64;

use bytemuck::Pod;
use log::debug;
use wgpu::util::DeviceExt;
use wgpu::{ShaderModuleDescriptor, ShaderSource};

use super::{BackendKind, BufferAccess, ComputeBackend, DeviceInfo, Dispatch, KernelCall};
use crate::buffer::GpuBuffer;
use crate::context::GpuContext;
use crate::error::{DeviceStatus, Error, Result};
use crate::kernels::{KernelKind, KernelSource};

pub struct WgpuProgram {
    label: String,
    block: u32,
    pipelines: HashMap<KernelKind, KernelPipeline>,
}

struct KernelPipeline {
    pipeline: wgpu::ComputePipeline,
    layout: wgpu::BindGroupLayout,
}

pub struct WgpuBackend {
    context: GpuContext,
    info: DeviceInfo,
}

impl WgpuBackend {
    /// Select a GPU and create the device.
    pub fn discover() -> Result<Self> {
        let context = GpuContext::new_blocking()?;
        Ok(Self::with_context(context))
    }

    pub fn with_context(context: GpuContext) -> Self {
        let limits = context.device.limits();
        let info = DeviceInfo {
            name: context.adapter_name(),
            backend: BackendKind::Wgpu,
            max_groups_per_dimension: limits.max_compute_workgroups_per_dimension,
            max_invocations_per_group: limits.max_compute_invocations_per_workgroup,
        };
        Self { context, info }
    }

    pub fn context(&self) -> &GpuContext {
        &self.context
    }

    /// Run `f` inside a validation error scope and map a captured error.
    fn scoped<R>(&self, f: impl FnOnce() -> R, on_error: impl FnOnce(wgpu::Error) -> Error) -> Result<R> {
        self.context.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let value = f();
        match pollster::block_on(self.context.device.pop_error_scope()) {
            Some(e) => Err(on_error(e)),
            None => Ok(value),
        }
    }

    fn pipeline(&self, module: &wgpu::ShaderModule, kind: KernelKind) -> KernelPipeline {
        let device = &self.context.device;
        let entries: Vec<wgpu::BindGroupLayoutEntry> = match kind {
            KernelKind::BlockScan | KernelKind::LevelMerge => vec![
                storage_entry(0, false),
                uniform_entry(1, std::mem::size_of::<crate::kernels::ScanParams>()),
            ],
            KernelKind::TiledConvolution => vec![
                storage_entry(0, true),
                storage_entry(1, true),
                storage_entry(2, false),
                uniform_entry(3, std::mem::size_of::<crate::kernels::ConvolutionParams>()),
            ],
        };
        let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some(kind.entry_point()),
            entries: &entries,
        });
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some(kind.entry_point()),
            bind_group_layouts: &[&layout],
            push_constant_ranges: &[],
        });
        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some(kind.entry_point()),
            layout: Some(&pipeline_layout),
            module,
            entry_point: Some(kind.entry_point()),
            compilation_options: wgpu::PipelineCompilationOptions::default(),
            cache: None,
        });
        KernelPipeline { pipeline, layout }
    }

    fn uniform<P: Pod>(&self, params: &P) -> wgpu::Buffer {
        self.context
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("kernel_params"),
                contents: bytemuck::bytes_of(params),
                usage: wgpu::BufferUsages::UNIFORM,
            })
    }
}

fn storage_entry(binding: u32, read_only: bool) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only },
            has_dynamic_offset: false,
            min_binding_size: NonZeroU64::new(std::mem::size_of::<f32>() as u64),
        },
        count: None,
    }
}

fn uniform_entry(binding: u32, size: usize) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: NonZeroU64::new(size as u64),
        },
        count: None,
    }
}

impl ComputeBackend for WgpuBackend {
    type Buffer = GpuBuffer<f32>;
    type Program = WgpuProgram;
    type Completion = wgpu::SubmissionIndex;

    fn info(&self) -> &DeviceInfo {
        &self.info
    }

    fn compile(&self, source: &KernelSource) -> Result<WgpuProgram> {
        let kernels = source.validate()?;
        let compile_error = |e: wgpu::Error| Error::Compile {
            kernel: source.label().to_string(),
            log: e.to_string(),
        };
        let module = self.scoped(
            || {
                self.context.device.create_shader_module(ShaderModuleDescriptor {
                    label: Some(source.label()),
                    source: ShaderSource::Wgsl(source.text().into()),
                })
            },
            compile_error,
        )?;
        let mut pipelines = HashMap::new();
        for kind in kernels {
            let pipeline = self.scoped(|| self.pipeline(&module, kind), compile_error)?;
            pipelines.insert(kind, pipeline);
        }
        debug!("compiled `{}` for block {}", source.label(), source.block());
        Ok(WgpuProgram {
            label: source.label().to_string(),
            block: source.block(),
            pipelines,
        })
    }

    fn allocate(&self, len: usize, access: BufferAccess) -> Result<GpuBuffer<f32>> {
        GpuBuffer::new_storage(&self.context, len, access)
    }

    fn write(&self, buffer: &GpuBuffer<f32>, data: &[f32]) -> Result<()> {
        buffer.write(&self.context, data)
    }

    fn read(&self, buffer: &GpuBuffer<f32>) -> Result<Vec<f32>> {
        buffer.read_to_vec(&self.context)
    }

    fn launch(
        &self,
        program: &WgpuProgram,
        call: KernelCall<'_, GpuBuffer<f32>>,
        dispatch: Dispatch,
    ) -> Result<wgpu::SubmissionIndex> {
        let kind = call.kind();
        let Some(kernel) = program.pipelines.get(&kind) else {
            return Err(Error::device(
                DeviceStatus::InvalidKernelName,
                format!("program `{}` has no kernel `{kind}`", program.label),
            ));
        };
        if dispatch.local != kind.group_shape(program.block) {
            return Err(Error::device(
                DeviceStatus::InvalidWorkGroupSize,
                format!("`{kind}` was compiled for block {}, got {:?}", program.block, dispatch.local),
            ));
        }
        let groups = dispatch.groups()?;
        call.check_access(|b| b.access)?;

        let device = &self.context.device;
        let (params, buffers): (wgpu::Buffer, Vec<&wgpu::Buffer>) = match &call {
            KernelCall::BlockScan { values, params } | KernelCall::LevelMerge { values, params } => {
                (self.uniform(params), vec![&values.buffer])
            }
            KernelCall::TiledConvolution {
                input,
                mask,
                output,
                params,
            } => (
                self.uniform(params),
                vec![&input.buffer, &mask.buffer, &output.buffer],
            ),
        };

        let index = self.scoped(
            || {
                let mut entries: Vec<wgpu::BindGroupEntry> = buffers
                    .iter()
                    .enumerate()
                    .map(|(binding, buffer)| wgpu::BindGroupEntry {
                        binding: binding as u32,
                        resource: buffer.as_entire_binding(),
                    })
                    .collect();
                entries.push(wgpu::BindGroupEntry {
                    binding: buffers.len() as u32,
                    resource: params.as_entire_binding(),
                });
                let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
                    label: Some(kind.entry_point()),
                    layout: &kernel.layout,
                    entries: &entries,
                });
                let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some(kind.entry_point()),
                });
                {
                    let mut cpass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                        label: Some(kind.entry_point()),
                        timestamp_writes: None,
                    });
                    cpass.set_pipeline(&kernel.pipeline);
                    cpass.set_bind_group(0, &bind_group, &[]);
                    cpass.dispatch_workgroups(groups[0], groups[1], 1);
                }
                self.context.queue.submit([encoder.finish()])
            },
            |e| Error::device(DeviceStatus::Validation, e.to_string()),
        )?;
        debug!("launched `{kind}` over {groups:?} groups");
        Ok(index)
    }

    fn wait(&self, completion: wgpu::SubmissionIndex) -> Result<()> {
        self.context
            .device
            .poll(wgpu::PollType::WaitForSubmissionIndex(completion))
            .map(|_| ())
            .map_err(|e| Error::device(DeviceStatus::Timeout, e.to_string()))
    }
}
